//! # Store — Storage Seam for the Engine
//!
//! The engine never talks to a database directly; it goes through this trait,
//! which exposes *semantic* operations rather than raw reads and writes. Each
//! operation is atomic at the storage layer: balance increments are single
//! row updates, the announced-window check happens inside the same operation
//! as the score upsert, and the one-way flag flips (`announce_window`,
//! `try_mark_achievements_calculated`, `try_claim_reward`) are
//! compare-and-set updates that report whether this caller performed the
//! transition. Composing those primitives race-safely is the engine's job;
//! making each primitive indivisible is the backend's.
//!
//! Two backends ship:
//!
//! - [`MemoryStore`] — a single-mutex in-process store for tests and local
//!   development. One lock for the whole state keeps cross-row checks inside
//!   the same critical section, matching the SQL backend's transaction scope.
//! - [`crate::db::Database`] — PostgreSQL via sqlx; see the `db` module.

pub mod memory;

pub use memory::{MemoryDirectory, MemoryStore};

use crate::achievements::{AchievementKind, AchievementProgress, ProgressBump};
use crate::balance::UserBalance;
use crate::leaderboard::{LeaderboardEntry, Window};
use crate::ledger::{PointsHistoryEntry, PointsSource};
use crate::{EngineResult, Segment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
    // ==================== Balance ====================

    /// Atomically add `amount` to a user's lifetime balance, creating the row
    /// at the entry level on first grant. Returns the post-credit row.
    async fn credit_balance(&self, user: Uuid, amount: i64) -> EngineResult<UserBalance>;

    async fn get_balance(&self, user: Uuid) -> EngineResult<Option<UserBalance>>;

    /// Conditionally move a user from `from_level` to `to_level`. Returns
    /// false when the stored level no longer matches `from_level` (a
    /// concurrent writer advanced the user first). Levels only move upward.
    async fn promote_level(&self, user: Uuid, from_level: i32, to_level: i32)
        -> EngineResult<bool>;

    // ==================== Ledger ====================

    /// Append one immutable history entry.
    async fn append_history(&self, entry: &PointsHistoryEntry) -> EngineResult<()>;

    /// Most recent entries for a user, newest first, capped at `limit`.
    async fn history(&self, user: Uuid, limit: i64) -> EngineResult<Vec<PointsHistoryEntry>>;

    /// Balance credit plus ledger append as one atomic storage operation
    /// (single transaction in SQL, single lock hold in memory), so a partial
    /// failure can never leave a credited balance with no audit trail.
    async fn credit_and_record(
        &self,
        user: Uuid,
        amount: i64,
        source: PointsSource,
        description: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<UserBalance>;

    // ==================== Leaderboard ====================

    /// Increment (or create, with a provisional rank of 1) a windowed score.
    /// Fails with `WindowClosed` if the window is announced and with
    /// `InsufficientBalance` if the result would be negative; both checks are
    /// part of the same atomic operation as the write.
    async fn upsert_score(
        &self,
        user: Uuid,
        window: &Window,
        segment: Segment,
        delta: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<LeaderboardEntry>;

    /// All entries for a window+segment, ordered by
    /// `(points DESC, created_at ASC)` with a stable final tie-break.
    async fn window_entries(
        &self,
        window: &Window,
        segment: Segment,
    ) -> EngineResult<Vec<LeaderboardEntry>>;

    /// Batch-persist recomputed ranks.
    async fn write_ranks(
        &self,
        window: &Window,
        segment: Segment,
        ranks: &[(Uuid, i32)],
    ) -> EngineResult<()>;

    /// Compare-and-set the announced flag. Returns true only for the caller
    /// that performed the flip; the window is permanently closed afterwards.
    async fn announce_window(&self, window: &Window, segment: Segment) -> EngineResult<bool>;

    async fn is_window_announced(&self, window: &Window, segment: Segment) -> EngineResult<bool>;

    /// Compare-and-set the achievement-sweep flag for a window. True only for
    /// the caller that performed the flip.
    async fn try_mark_achievements_calculated(
        &self,
        window: &Window,
        segment: Segment,
    ) -> EngineResult<bool>;

    /// The most recently ended window (relative to `now`) that has
    /// participants and has not had its achievement sweep marked done.
    async fn latest_sweepable_window(
        &self,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Window>>;

    /// Ended windows with participants whose announced flag is still unset,
    /// oldest first. Drives the periodic finalizer.
    async fn unannounced_ended_windows(
        &self,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Window>>;

    // ==================== Achievements ====================

    /// Atomically advance a progress counter: no-op when already completed,
    /// otherwise increment by one and flip completion when the counter
    /// reaches `total_count`. `newly_completed` is true exactly once per
    /// `(user, kind)`.
    async fn bump_progress(
        &self,
        user: Uuid,
        kind: AchievementKind,
        total_count: i32,
        now: DateTime<Utc>,
    ) -> EngineResult<ProgressBump>;

    async fn get_progress(
        &self,
        user: Uuid,
        kind: AchievementKind,
    ) -> EngineResult<Option<AchievementProgress>>;

    async fn all_progress(&self, user: Uuid) -> EngineResult<Vec<AchievementProgress>>;

    /// Compare-and-set the reward flag: flips `reward_claimed` only when the
    /// achievement is completed and unclaimed, and returns whether this
    /// caller performed the flip. Never read-then-write.
    async fn try_claim_reward(&self, user: Uuid, kind: AchievementKind) -> EngineResult<bool>;
}

/// External user-directory collaborator: the engine never creates or deletes
/// user identities, it only resolves referral edges.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// The user's referrer, if any. Fails with `UserNotFound` when the user
    /// itself is missing from the directory.
    async fn referrer_of(&self, user: Uuid) -> EngineResult<Option<Uuid>>;
}
