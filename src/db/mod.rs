//! # Database — PostgreSQL Storage Backend
//!
//! Implements the [`Store`] and [`UserDirectory`] seams on top of
//! `sqlx::PgPool`. Every primitive the engine relies on maps to a single SQL
//! statement (atomic per-row increments, `ON CONFLICT` upserts, conditional
//! flag flips) or a short transaction where two writes must land together.
//!
//! ## Schema
//!
//! See `migrations/001_create_engine.sql`:
//!
//! - `users`: platform-owned identity table; the engine reads
//!   `referred_by_id` and `segment` only
//! - `levels`: static ladder, loaded once at startup
//! - `user_balances`: lifetime beam totals and level position
//! - `points_history`: append-only grant ledger
//! - `leaderboard_entries` / `leaderboard_announcements`: windowed scores,
//!   ranks, and the one-way announced/calculated flags
//! - `user_achievements`: per-user badge progress
//!
//! ## Module Structure
//!
//! Operations are split into submodules by domain:
//!
//! - [`balances`] — balance credit, level promotion, transactional grant
//! - [`leaderboard`] — score upserts, rank batches, window flags
//! - [`achievements`] — progress counters and the claim flip
//! - [`users`] — referrer lookup and level-catalog load

mod achievements;
mod balances;
mod leaderboard;
mod users;

use crate::achievements::{AchievementKind, AchievementProgress, ProgressBump};
use crate::balance::UserBalance;
use crate::leaderboard::{LeaderboardEntry, Window};
use crate::ledger::{PointsHistoryEntry, PointsSource};
use crate::store::{Store, UserDirectory};
use crate::{EngineResult, Segment};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use uuid::Uuid;

// ── Row types ───────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
pub(crate) struct BalanceRow {
    pub user_id: Uuid,
    pub total_points: i64,
    pub level_number: i32,
}

impl From<BalanceRow> for UserBalance {
    fn from(row: BalanceRow) -> Self {
        UserBalance {
            user_id: row.user_id,
            total_points: row.total_points,
            level_number: row.level_number,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct HistoryRow {
    pub user_id: Uuid,
    pub points: i64,
    pub source: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub user_id: Uuid,
    pub points: i64,
    pub rank: i32,
    pub created_at: DateTime<Utc>,
}

impl From<EntryRow> for LeaderboardEntry {
    fn from(row: EntryRow) -> Self {
        LeaderboardEntry {
            user_id: row.user_id,
            points: row.points,
            rank: row.rank,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct WindowRow {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl From<WindowRow> for Window {
    fn from(row: WindowRow) -> Self {
        Window {
            start: row.window_start,
            end: row.window_end,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ProgressRow {
    pub progress: i32,
    pub completed: bool,
    pub reward_claimed: bool,
    pub updated_at: DateTime<Utc>,
}

// ── Database struct and connection ──────────────────────────────

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// Manually parses the URL to preserve the full username — sqlx's
    /// built-in parser strips the ".project-ref" suffix that pooled hosting
    /// providers require.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check: execute `SELECT 1` to verify database connectivity.
    ///
    /// Used by the `/readyz` readiness probe. Returns `Ok(())` if the
    /// database responds, or an error if the connection is broken.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

// ── Trait wiring ────────────────────────────────────────────────

#[async_trait]
impl Store for Database {
    async fn credit_balance(&self, user: Uuid, amount: i64) -> EngineResult<UserBalance> {
        self.credit_user_balance(user, amount).await
    }

    async fn get_balance(&self, user: Uuid) -> EngineResult<Option<UserBalance>> {
        self.find_user_balance(user).await
    }

    async fn promote_level(
        &self,
        user: Uuid,
        from_level: i32,
        to_level: i32,
    ) -> EngineResult<bool> {
        self.advance_user_level(user, from_level, to_level).await
    }

    async fn append_history(&self, entry: &PointsHistoryEntry) -> EngineResult<()> {
        self.insert_history_entry(entry).await
    }

    async fn history(&self, user: Uuid, limit: i64) -> EngineResult<Vec<PointsHistoryEntry>> {
        self.user_history(user, limit).await
    }

    async fn credit_and_record(
        &self,
        user: Uuid,
        amount: i64,
        source: PointsSource,
        description: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<UserBalance> {
        self.grant_in_transaction(user, amount, source, description, now)
            .await
    }

    async fn upsert_score(
        &self,
        user: Uuid,
        window: &Window,
        segment: Segment,
        delta: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<LeaderboardEntry> {
        self.increment_window_score(user, window, segment, delta, now)
            .await
    }

    async fn window_entries(
        &self,
        window: &Window,
        segment: Segment,
    ) -> EngineResult<Vec<LeaderboardEntry>> {
        self.fetch_window_entries(window, segment).await
    }

    async fn write_ranks(
        &self,
        window: &Window,
        segment: Segment,
        ranks: &[(Uuid, i32)],
    ) -> EngineResult<()> {
        self.persist_ranks(window, segment, ranks).await
    }

    async fn announce_window(&self, window: &Window, segment: Segment) -> EngineResult<bool> {
        self.mark_window_announced(window, segment).await
    }

    async fn is_window_announced(&self, window: &Window, segment: Segment) -> EngineResult<bool> {
        self.window_announced(window, segment).await
    }

    async fn try_mark_achievements_calculated(
        &self,
        window: &Window,
        segment: Segment,
    ) -> EngineResult<bool> {
        self.mark_window_calculated(window, segment).await
    }

    async fn latest_sweepable_window(
        &self,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Window>> {
        self.next_sweepable_window(segment, now).await
    }

    async fn unannounced_ended_windows(
        &self,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Window>> {
        self.stale_open_windows(segment, now).await
    }

    async fn bump_progress(
        &self,
        user: Uuid,
        kind: AchievementKind,
        total_count: i32,
        now: DateTime<Utc>,
    ) -> EngineResult<ProgressBump> {
        self.advance_achievement(user, kind, total_count, now).await
    }

    async fn get_progress(
        &self,
        user: Uuid,
        kind: AchievementKind,
    ) -> EngineResult<Option<AchievementProgress>> {
        self.achievement_row(user, kind).await
    }

    async fn all_progress(&self, user: Uuid) -> EngineResult<Vec<AchievementProgress>> {
        self.achievement_rows(user).await
    }

    async fn try_claim_reward(&self, user: Uuid, kind: AchievementKind) -> EngineResult<bool> {
        self.flip_reward_claimed(user, kind).await
    }
}

#[async_trait]
impl UserDirectory for Database {
    async fn referrer_of(&self, user: Uuid) -> EngineResult<Option<Uuid>> {
        self.user_referrer(user).await
    }
}
