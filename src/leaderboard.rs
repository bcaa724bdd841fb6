//! # Leaderboard — Windowed Scores and Dense Ranks
//!
//! Beams earned during a window accumulate in per-`(user, window, segment)`
//! entries, separate from the lifetime balance. Ranks are dense: tied scores
//! share a rank and the next distinct score takes the previous rank plus one,
//! so a "top 10" listing never has gaps. Ties order by earliest entry
//! creation, rewarding early participation.
//!
//! Windows are fixed-length, day-aligned, and anchored to the Unix epoch, so
//! the mapping from a timestamp to its window is a pure function — every node
//! computes the same boundaries with no coordination.
//!
//! Rank recomputation reads the whole window and writes every rank back.
//! Interleaved recomputes would overwrite each other with stale snapshots, so
//! the engine serializes them through a mutex; the write is cheap at this
//! scale and the finalizer's last recompute is authoritative anyway.

use crate::store::Store;
use crate::{EngineResult, Segment};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A leaderboard period: `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// The window enclosing `now` for the given cadence. Boundaries fall on
    /// UTC midnights, `window_days` apart, counted from the epoch.
    pub fn containing(now: DateTime<Utc>, window_days: i64) -> Window {
        debug_assert!(window_days >= 1);
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        let days_since_epoch = (now - epoch).num_days();
        // `num_days` truncates toward zero; shift pre-epoch stamps down a slot.
        let days_since_epoch = if now < epoch && (now - epoch) != Duration::days(days_since_epoch)
        {
            days_since_epoch - 1
        } else {
            days_since_epoch
        };
        let slot = days_since_epoch.div_euclid(window_days);
        let start = epoch + Duration::days(slot * window_days);
        Window {
            start,
            end: start + Duration::days(window_days),
        }
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end <= now
    }

    /// The window immediately before this one.
    pub fn previous(&self) -> Window {
        let span = self.end - self.start;
        Window {
            start: self.start - span,
            end: self.start,
        }
    }
}

/// One scored participant within a window+segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: Uuid,
    pub points: i64,
    pub rank: i32,
    pub created_at: DateTime<Utc>,
}

/// Dense-rank assignment over entries already ordered by
/// `(points DESC, created_at ASC)`: first entry takes rank 1, equal points
/// share the previous rank, a lower score takes the previous rank plus one.
pub fn assign_dense_ranks(entries: &[LeaderboardEntry]) -> Vec<(Uuid, i32)> {
    let mut ranks = Vec::with_capacity(entries.len());
    let mut current_rank = 0;
    let mut previous_points = None;
    for entry in entries {
        if previous_points != Some(entry.points) {
            current_rank += 1;
            previous_points = Some(entry.points);
        }
        ranks.push((entry.user_id, current_rank));
    }
    ranks
}

pub struct LeaderboardWindow {
    store: Arc<dyn Store>,
    window_days: i64,
    // Serializes read-rank-write cycles; see module docs.
    recompute_lock: Mutex<()>,
}

impl LeaderboardWindow {
    pub fn new(store: Arc<dyn Store>, window_days: i64) -> Self {
        LeaderboardWindow {
            store,
            window_days,
            recompute_lock: Mutex::new(()),
        }
    }

    pub fn current_window(&self, now: DateTime<Utc>) -> Window {
        Window::containing(now, self.window_days)
    }

    /// Increment (or create) the caller's windowed score. Fails with
    /// `WindowClosed` once the window is announced and with
    /// `InsufficientBalance` if the delta would drive the score negative;
    /// both checks happen inside the same storage operation as the write.
    pub async fn upsert_score(
        &self,
        user: Uuid,
        segment: Segment,
        delta: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<LeaderboardEntry> {
        let window = self.current_window(now);
        self.store
            .upsert_score(user, &window, segment, delta, now)
            .await
    }

    /// Recompute and persist dense ranks for every participant in the window.
    pub async fn recompute_ranks(&self, window: &Window, segment: Segment) -> EngineResult<()> {
        let _guard = self.recompute_lock.lock().await;
        let entries = self.store.window_entries(window, segment).await?;
        let ranks = assign_dense_ranks(&entries);
        self.store.write_ranks(window, segment, &ranks).await
    }

    /// Top `limit` entries for a window, in rank order.
    pub async fn top(
        &self,
        window: &Window,
        segment: Segment,
        limit: usize,
    ) -> EngineResult<Vec<LeaderboardEntry>> {
        let mut entries = self.store.window_entries(window, segment).await?;
        entries.truncate(limit);
        Ok(entries)
    }
}
