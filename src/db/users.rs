//! User-directory reads and reference-data loading.
//!
//! The engine never writes the users table; it resolves referral edges from
//! it and loads the level ladder once at startup.

use super::Database;
use crate::levels::{Level, LevelCatalog};
use crate::{EngineError, EngineResult};
use uuid::Uuid;

impl Database {
    /// A user's referrer, or `UserNotFound` when the user itself is missing.
    pub(crate) async fn user_referrer(&self, user: Uuid) -> EngineResult<Option<Uuid>> {
        let row = sqlx::query_scalar::<_, Option<Uuid>>(
            "SELECT referred_by_id FROM users WHERE id = $1",
        )
        .bind(user)
        .fetch_optional(self.pool())
        .await?;
        match row {
            Some(referrer) => Ok(referrer),
            None => Err(EngineError::UserNotFound(user)),
        }
    }

    /// Load and validate the level ladder.
    pub async fn load_level_catalog(&self) -> EngineResult<LevelCatalog> {
        #[derive(sqlx::FromRow)]
        struct LevelRow {
            level_number: i32,
            min_points: i64,
            max_points: i64,
            name: String,
            caption: String,
        }

        let rows = sqlx::query_as::<_, LevelRow>(
            "SELECT level_number, min_points, max_points, name, caption
             FROM levels ORDER BY level_number",
        )
        .fetch_all(self.pool())
        .await?;

        LevelCatalog::new(
            rows.into_iter()
                .map(|r| Level {
                    level_number: r.level_number,
                    min_points: r.min_points,
                    max_points: r.max_points,
                    name: r.name,
                    caption: r.caption,
                })
                .collect(),
        )
    }
}
