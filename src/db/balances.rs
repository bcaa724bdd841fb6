//! Balance and ledger operations.
//!
//! Balance increments are single upsert statements so concurrent grants to
//! the same user serialize on the row and never lose an increment. The
//! grant path (credit plus ledger append) runs in one transaction: a
//! credited balance can never exist without its audit entry.

use super::{BalanceRow, Database, HistoryRow};
use crate::balance::UserBalance;
use crate::ledger::{PointsHistoryEntry, PointsSource};
use crate::EngineResult;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use uuid::Uuid;

impl Database {
    /// Atomically add `amount` beams, creating the balance at the entry
    /// level on first grant.
    pub(crate) async fn credit_user_balance(
        &self,
        user: Uuid,
        amount: i64,
    ) -> EngineResult<UserBalance> {
        let row = sqlx::query_as::<_, BalanceRow>(
            "INSERT INTO user_balances (user_id, total_points, level_number)
             VALUES ($1, $2, 1)
             ON CONFLICT (user_id) DO UPDATE SET
               total_points = user_balances.total_points + EXCLUDED.total_points,
               updated_at = NOW()
             RETURNING user_id, total_points, level_number",
        )
        .bind(user)
        .bind(amount)
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    pub(crate) async fn find_user_balance(
        &self,
        user: Uuid,
    ) -> EngineResult<Option<UserBalance>> {
        let row = sqlx::query_as::<_, BalanceRow>(
            "SELECT user_id, total_points, level_number
             FROM user_balances WHERE user_id = $1",
        )
        .bind(user)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Into::into))
    }

    /// Conditional single-step promotion: only fires while the stored level
    /// still matches the one the caller evaluated against.
    pub(crate) async fn advance_user_level(
        &self,
        user: Uuid,
        from_level: i32,
        to_level: i32,
    ) -> EngineResult<bool> {
        let result = sqlx::query(
            "UPDATE user_balances SET level_number = $3, updated_at = NOW()
             WHERE user_id = $1 AND level_number = $2",
        )
        .bind(user)
        .bind(from_level)
        .bind(to_level)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn insert_history_entry(
        &self,
        entry: &PointsHistoryEntry,
    ) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO points_history (user_id, points, source, description, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.user_id)
        .bind(entry.points)
        .bind(entry.source.as_str())
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub(crate) async fn user_history(
        &self,
        user: Uuid,
        limit: i64,
    ) -> EngineResult<Vec<PointsHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT user_id, points, source, description, created_at
             FROM points_history
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
        )
        .bind(user)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PointsHistoryEntry {
                    user_id: row.user_id,
                    points: row.points,
                    source: PointsSource::from_str(&row.source)?,
                    description: row.description,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    /// Credit plus ledger append in one transaction.
    pub(crate) async fn grant_in_transaction(
        &self,
        user: Uuid,
        amount: i64,
        source: PointsSource,
        description: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<UserBalance> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query_as::<_, BalanceRow>(
            "INSERT INTO user_balances (user_id, total_points, level_number)
             VALUES ($1, $2, 1)
             ON CONFLICT (user_id) DO UPDATE SET
               total_points = user_balances.total_points + EXCLUDED.total_points,
               updated_at = NOW()
             RETURNING user_id, total_points, level_number",
        )
        .bind(user)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO points_history (user_id, points, source, description, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user)
        .bind(amount)
        .bind(source.as_str())
        .bind(description)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }
}
