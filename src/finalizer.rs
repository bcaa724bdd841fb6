//! # Leaderboard Finalizer — Window Closure and the Achievement Sweep
//!
//! Once a window's period ends it gets announced: an irreversible flag flip
//! that freezes its entries, followed by one last authoritative rank
//! recompute. Announcing twice is a no-op, and any score upsert against an
//! announced window fails with `WindowClosed`.
//!
//! The achievement sweep looks at the most recently ended window that has
//! not been swept, and grants badge progress to the top finishers: rank 1
//! earns champion progress, ranks 2 through the cutoff earn top-ten
//! progress. Windows with fewer than the minimum participant count are
//! skipped and left unmarked so they stay eligible (a deliberate policy:
//! no "top of the leaderboard" badges in near-empty windows). The sweep
//! gates on the calculated-flag flip *before* granting, so overlapping
//! scheduler ticks cannot double-grant.

use crate::achievements::{AchievementKind, AchievementTracker};
use crate::leaderboard::{LeaderboardWindow, Window};
use crate::store::Store;
use crate::{EngineResult, Segment};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// What a sweep pass did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// No ended window awaiting a sweep.
    NothingToSweep,
    /// The window had too few participants; left unmarked.
    InsufficientParticipants { window: Window, participants: usize },
    /// Another sweep won the flag race; nothing granted here.
    AlreadyCalculated { window: Window },
    /// Badge progress granted.
    Swept {
        window: Window,
        champions: usize,
        top_ten: usize,
    },
}

pub struct LeaderboardFinalizer {
    store: Arc<dyn Store>,
    board: Arc<LeaderboardWindow>,
    tracker: Arc<AchievementTracker>,
    min_participants: usize,
    top_cutoff: i32,
}

impl LeaderboardFinalizer {
    pub fn new(
        store: Arc<dyn Store>,
        board: Arc<LeaderboardWindow>,
        tracker: Arc<AchievementTracker>,
        min_participants: usize,
        top_cutoff: i32,
    ) -> Self {
        LeaderboardFinalizer {
            store,
            board,
            tracker,
            min_participants,
            top_cutoff,
        }
    }

    /// Announce a window. Returns true only when this call performed the
    /// flip; the final rank recompute runs once, after the flag is set, so
    /// no in-flight grant can land behind it.
    pub async fn finalize_window(&self, window: &Window, segment: Segment) -> EngineResult<bool> {
        let newly_announced = self.store.announce_window(window, segment).await?;
        if newly_announced {
            self.board.recompute_ranks(window, segment).await?;
            info!(
                segment = %segment,
                start = %window.start,
                end = %window.end,
                "leaderboard window finalized"
            );
        }
        Ok(newly_announced)
    }

    /// Announce every ended window that still accepts scores. Invoked by the
    /// periodic sweeper; idempotent across overlapping ticks.
    pub async fn finalize_due_windows(
        &self,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let due = self.store.unannounced_ended_windows(segment, now).await?;
        let mut finalized = 0;
        for window in due {
            if self.finalize_window(&window, segment).await? {
                finalized += 1;
            }
        }
        Ok(finalized)
    }

    /// Grant top-finisher badge progress for the most recently ended,
    /// not-yet-swept window of a segment.
    pub async fn sweep_achievements(
        &self,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<SweepOutcome> {
        let window = match self.store.latest_sweepable_window(segment, now).await? {
            Some(w) => w,
            None => return Ok(SweepOutcome::NothingToSweep),
        };

        let entries = self.store.window_entries(&window, segment).await?;
        if entries.len() < self.min_participants {
            info!(
                segment = %segment,
                participants = entries.len(),
                minimum = self.min_participants,
                "skipping achievement sweep for under-populated window"
            );
            return Ok(SweepOutcome::InsufficientParticipants {
                window,
                participants: entries.len(),
            });
        }

        // Gate before granting: the loser of a concurrent sweep grants nothing.
        if !self
            .store
            .try_mark_achievements_calculated(&window, segment)
            .await?
        {
            return Ok(SweepOutcome::AlreadyCalculated { window });
        }

        let mut champions = 0;
        let mut top_ten = 0;
        for entry in &entries {
            if entry.rank == 1 {
                self.tracker
                    .increment_progress(entry.user_id, AchievementKind::WeeklyChampion, now)
                    .await?;
                champions += 1;
            } else if entry.rank <= self.top_cutoff {
                self.tracker
                    .increment_progress(entry.user_id, AchievementKind::WeeklyTopTen, now)
                    .await?;
                top_ten += 1;
            }
        }

        info!(
            segment = %segment,
            champions,
            top_ten,
            "achievement sweep complete"
        );
        Ok(SweepOutcome::Swept {
            window,
            champions,
            top_ten,
        })
    }
}
