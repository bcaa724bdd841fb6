//! Leaderboard operations: windowed scores, rank batches, window flags.
//!
//! The score upsert embeds the announced check in the same statement as the
//! write, so a grant can never land in a window after its announcement
//! commits. The two window flags are one-way compare-and-set updates whose
//! row count tells the caller whether it performed the transition.

use super::{Database, EntryRow, WindowRow};
use crate::leaderboard::{LeaderboardEntry, Window};
use crate::{EngineError, EngineResult, Segment};
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl Database {
    /// Increment (or create) a windowed score. The update and insert paths
    /// both re-verify the announced flag and the non-negativity constraint
    /// inside the statement itself.
    pub(crate) async fn increment_window_score(
        &self,
        user: Uuid,
        window: &Window,
        segment: Segment,
        delta: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<LeaderboardEntry> {
        // Two passes at most: the second only runs when a concurrent insert
        // beat ours to the unique key.
        for _ in 0..2 {
            let updated = sqlx::query_as::<_, EntryRow>(
                "UPDATE leaderboard_entries e SET points = e.points + $5
                 WHERE e.user_id = $1 AND e.window_start = $2 AND e.window_end = $3
                   AND e.segment = $4
                   AND e.points + $5 >= 0
                   AND NOT EXISTS (
                     SELECT 1 FROM leaderboard_announcements a
                     WHERE a.window_start = $2 AND a.window_end = $3
                       AND a.segment = $4 AND a.announced
                   )
                 RETURNING e.user_id, e.points, e.rank, e.created_at",
            )
            .bind(user)
            .bind(window.start)
            .bind(window.end)
            .bind(segment.as_str())
            .bind(delta)
            .fetch_optional(self.pool())
            .await?;
            if let Some(row) = updated {
                return Ok(row.into());
            }

            // The update matched nothing: closed window, insufficient points,
            // or no row yet. Distinguish before trying to insert.
            if self.window_announced(window, segment).await? {
                return Err(EngineError::WindowClosed {
                    start: window.start,
                    end: window.end,
                });
            }
            let existing = sqlx::query_scalar::<_, i64>(
                "SELECT points FROM leaderboard_entries
                 WHERE user_id = $1 AND window_start = $2 AND window_end = $3 AND segment = $4",
            )
            .bind(user)
            .bind(window.start)
            .bind(window.end)
            .bind(segment.as_str())
            .fetch_optional(self.pool())
            .await?;
            if delta < 0 {
                return Err(EngineError::InsufficientBalance { user });
            }
            if existing.is_some() {
                // The row appeared between our update miss and this check;
                // a non-negative delta settles through the update path.
                continue;
            }

            let inserted = sqlx::query_as::<_, EntryRow>(
                "INSERT INTO leaderboard_entries
                   (user_id, window_start, window_end, segment, points, rank, created_at)
                 SELECT $1, $2, $3, $4, $5, 1, $6
                 WHERE NOT EXISTS (
                   SELECT 1 FROM leaderboard_announcements a
                   WHERE a.window_start = $2 AND a.window_end = $3
                     AND a.segment = $4 AND a.announced
                 )
                 ON CONFLICT (user_id, window_start, window_end, segment) DO NOTHING
                 RETURNING user_id, points, rank, created_at",
            )
            .bind(user)
            .bind(window.start)
            .bind(window.end)
            .bind(segment.as_str())
            .bind(delta)
            .bind(now)
            .fetch_optional(self.pool())
            .await?;
            match inserted {
                Some(row) => return Ok(row.into()),
                // Conflict with a concurrent insert (or a just-announced
                // window): loop once more and settle through the update path.
                None => continue,
            }
        }

        if self.window_announced(window, segment).await? {
            return Err(EngineError::WindowClosed {
                start: window.start,
                end: window.end,
            });
        }
        Err(EngineError::Storage(anyhow::anyhow!(
            "windowed score upsert for {} did not settle after retry",
            user
        )))
    }

    /// All entries for a window+segment, ordered for dense ranking:
    /// points descending, earliest entry first on ties, serial id last.
    pub(crate) async fn fetch_window_entries(
        &self,
        window: &Window,
        segment: Segment,
    ) -> EngineResult<Vec<LeaderboardEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            "SELECT user_id, points, rank, created_at
             FROM leaderboard_entries
             WHERE window_start = $1 AND window_end = $2 AND segment = $3
             ORDER BY points DESC, created_at ASC, id ASC",
        )
        .bind(window.start)
        .bind(window.end)
        .bind(segment.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Batch rank write via parallel arrays.
    pub(crate) async fn persist_ranks(
        &self,
        window: &Window,
        segment: Segment,
        ranks: &[(Uuid, i32)],
    ) -> EngineResult<()> {
        if ranks.is_empty() {
            return Ok(());
        }
        let users: Vec<Uuid> = ranks.iter().map(|(u, _)| *u).collect();
        let values: Vec<i32> = ranks.iter().map(|(_, r)| *r).collect();
        sqlx::query(
            "UPDATE leaderboard_entries e SET rank = r.rank
             FROM (SELECT UNNEST($4::uuid[]) AS user_id, UNNEST($5::int[]) AS rank) r
             WHERE e.user_id = r.user_id
               AND e.window_start = $1 AND e.window_end = $2 AND e.segment = $3",
        )
        .bind(window.start)
        .bind(window.end)
        .bind(segment.as_str())
        .bind(&users)
        .bind(&values)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Compare-and-set the announced flag; true only for the flipping caller.
    pub(crate) async fn mark_window_announced(
        &self,
        window: &Window,
        segment: Segment,
    ) -> EngineResult<bool> {
        let result = sqlx::query(
            "INSERT INTO leaderboard_announcements (window_start, window_end, segment, announced)
             VALUES ($1, $2, $3, TRUE)
             ON CONFLICT (window_start, window_end, segment) DO UPDATE SET announced = TRUE
             WHERE leaderboard_announcements.announced = FALSE",
        )
        .bind(window.start)
        .bind(window.end)
        .bind(segment.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn window_announced(
        &self,
        window: &Window,
        segment: Segment,
    ) -> EngineResult<bool> {
        let announced = sqlx::query_scalar::<_, bool>(
            "SELECT announced FROM leaderboard_announcements
             WHERE window_start = $1 AND window_end = $2 AND segment = $3",
        )
        .bind(window.start)
        .bind(window.end)
        .bind(segment.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(announced.unwrap_or(false))
    }

    /// Compare-and-set the achievement-sweep flag; true only for the
    /// flipping caller.
    pub(crate) async fn mark_window_calculated(
        &self,
        window: &Window,
        segment: Segment,
    ) -> EngineResult<bool> {
        let result = sqlx::query(
            "INSERT INTO leaderboard_announcements
               (window_start, window_end, segment, achievements_calculated)
             VALUES ($1, $2, $3, TRUE)
             ON CONFLICT (window_start, window_end, segment)
               DO UPDATE SET achievements_calculated = TRUE
             WHERE leaderboard_announcements.achievements_calculated = FALSE",
        )
        .bind(window.start)
        .bind(window.end)
        .bind(segment.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The most recently ended window with participants whose sweep has not
    /// been marked done.
    pub(crate) async fn next_sweepable_window(
        &self,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Window>> {
        let row = sqlx::query_as::<_, WindowRow>(
            "SELECT e.window_start, e.window_end
             FROM leaderboard_entries e
             LEFT JOIN leaderboard_announcements a
               ON a.window_start = e.window_start AND a.window_end = e.window_end
              AND a.segment = e.segment
             WHERE e.segment = $1 AND e.window_end <= $2
               AND COALESCE(a.achievements_calculated, FALSE) = FALSE
             GROUP BY e.window_start, e.window_end
             ORDER BY e.window_end DESC
             LIMIT 1",
        )
        .bind(segment.as_str())
        .bind(now)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Into::into))
    }

    /// Ended windows with participants that were never announced, oldest
    /// first.
    pub(crate) async fn stale_open_windows(
        &self,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Window>> {
        let rows = sqlx::query_as::<_, WindowRow>(
            "SELECT e.window_start, e.window_end
             FROM leaderboard_entries e
             LEFT JOIN leaderboard_announcements a
               ON a.window_start = e.window_start AND a.window_end = e.window_end
              AND a.segment = e.segment
             WHERE e.segment = $1 AND e.window_end <= $2
               AND COALESCE(a.announced, FALSE) = FALSE
             GROUP BY e.window_start, e.window_end
             ORDER BY e.window_end ASC",
        )
        .bind(segment.as_str())
        .bind(now)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
