//! Achievement progress operations.
//!
//! Progress rows are advanced under a `FOR UPDATE` row lock so the
//! capped-increment rule and the completion flip evaluate against a stable
//! row. The reward claim is a single conditional update — the statement
//! itself is the check.

use super::{Database, ProgressRow};
use crate::achievements::{AchievementKind, AchievementProgress, ProgressBump};
use crate::EngineResult;
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl Database {
    /// Advance a progress counter by one, capped at completion.
    pub(crate) async fn advance_achievement(
        &self,
        user: Uuid,
        kind: AchievementKind,
        total_count: i32,
        now: DateTime<Utc>,
    ) -> EngineResult<ProgressBump> {
        // Two passes at most: the second only runs when a concurrent insert
        // created the row between our miss and our insert attempt.
        for _ in 0..2 {
            let mut tx = self.pool().begin().await?;

            let existing = sqlx::query_as::<_, ProgressRow>(
                "SELECT progress, completed, reward_claimed, updated_at
                 FROM user_achievements
                 WHERE user_id = $1 AND achievement = $2
                 FOR UPDATE",
            )
            .bind(user)
            .bind(kind.slug())
            .fetch_optional(&mut *tx)
            .await?;

            match existing {
                Some(row) if row.completed => {
                    tx.commit().await?;
                    return Ok(ProgressBump {
                        progress: row.progress,
                        completed: true,
                        newly_completed: false,
                    });
                }
                Some(row) => {
                    let progress = row.progress + 1;
                    let completed = progress >= total_count;
                    sqlx::query(
                        "UPDATE user_achievements
                         SET progress = $3, completed = $4, updated_at = $5
                         WHERE user_id = $1 AND achievement = $2",
                    )
                    .bind(user)
                    .bind(kind.slug())
                    .bind(progress)
                    .bind(completed)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    tx.commit().await?;
                    return Ok(ProgressBump {
                        progress,
                        completed,
                        newly_completed: completed,
                    });
                }
                None => {
                    let completed = 1 >= total_count;
                    let inserted = sqlx::query(
                        "INSERT INTO user_achievements
                           (user_id, achievement, progress, completed, updated_at)
                         VALUES ($1, $2, 1, $3, $4)
                         ON CONFLICT (user_id, achievement) DO NOTHING",
                    )
                    .bind(user)
                    .bind(kind.slug())
                    .bind(completed)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    tx.commit().await?;
                    if inserted.rows_affected() > 0 {
                        return Ok(ProgressBump {
                            progress: 1,
                            completed,
                            newly_completed: completed,
                        });
                    }
                    // Lost the insert race; take the update path.
                    continue;
                }
            }
        }
        Err(crate::EngineError::Storage(anyhow::anyhow!(
            "achievement progress for {} did not settle after retry",
            user
        )))
    }

    pub(crate) async fn achievement_row(
        &self,
        user: Uuid,
        kind: AchievementKind,
    ) -> EngineResult<Option<AchievementProgress>> {
        let row = sqlx::query_as::<_, ProgressRow>(
            "SELECT progress, completed, reward_claimed, updated_at
             FROM user_achievements
             WHERE user_id = $1 AND achievement = $2",
        )
        .bind(user)
        .bind(kind.slug())
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| AchievementProgress {
            user_id: user,
            kind,
            progress: r.progress,
            completed: r.completed,
            reward_claimed: r.reward_claimed,
            updated_at: r.updated_at,
        }))
    }

    pub(crate) async fn achievement_rows(
        &self,
        user: Uuid,
    ) -> EngineResult<Vec<AchievementProgress>> {
        #[derive(sqlx::FromRow)]
        struct NamedProgressRow {
            achievement: String,
            progress: i32,
            completed: bool,
            reward_claimed: bool,
            updated_at: DateTime<Utc>,
        }

        let rows = sqlx::query_as::<_, NamedProgressRow>(
            "SELECT achievement, progress, completed, reward_claimed, updated_at
             FROM user_achievements
             WHERE user_id = $1
             ORDER BY achievement",
        )
        .bind(user)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(AchievementProgress {
                    user_id: user,
                    kind: AchievementKind::from_slug(&r.achievement)?,
                    progress: r.progress,
                    completed: r.completed,
                    reward_claimed: r.reward_claimed,
                    updated_at: r.updated_at,
                })
            })
            .collect()
    }

    /// Flip `reward_claimed` for a completed, unclaimed achievement. The row
    /// count is the verdict: one means this caller owns the payout.
    pub(crate) async fn flip_reward_claimed(
        &self,
        user: Uuid,
        kind: AchievementKind,
    ) -> EngineResult<bool> {
        let result = sqlx::query(
            "UPDATE user_achievements
             SET reward_claimed = TRUE, updated_at = NOW()
             WHERE user_id = $1 AND achievement = $2
               AND completed AND NOT reward_claimed",
        )
        .bind(user)
        .bind(kind.slug())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
