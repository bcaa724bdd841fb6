//! # Levels — Static Ladder and Threshold Lookup
//!
//! The level ladder is read-only reference data: an ordered list of point
//! ranges, each with a display name and caption. Postgres deployments load it
//! from the `levels` table at startup; tests and local development use the
//! built-in default ladder. `LevelCatalog` validates contiguity once at
//! construction so every later lookup can assume a well-formed ladder.
//!
//! Level transitions are single-step: a credit that clears the current level's
//! `max_points` (strictly — landing exactly on the boundary does not advance)
//! moves the user to the next `level_number` only, even when the credited
//! amount spans several ranges.

use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// One rung of the ladder. Ranges are inclusive on both ends and contiguous
/// across ascending `level_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub level_number: i32,
    pub min_points: i64,
    pub max_points: i64,
    pub name: String,
    pub caption: String,
}

/// Validated, ordered level ladder.
#[derive(Debug, Clone)]
pub struct LevelCatalog {
    levels: Vec<Level>,
}

impl LevelCatalog {
    /// Build a catalog from raw rows, validating ordering and contiguity.
    pub fn new(mut levels: Vec<Level>) -> EngineResult<Self> {
        if levels.is_empty() {
            return Err(EngineError::InvalidLevelCatalog("no levels defined".into()));
        }
        levels.sort_by_key(|l| l.level_number);

        if levels[0].level_number != 1 {
            return Err(EngineError::InvalidLevelCatalog(format!(
                "ladder must start at level 1, got {}",
                levels[0].level_number
            )));
        }
        for pair in levels.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.level_number != prev.level_number + 1 {
                return Err(EngineError::InvalidLevelCatalog(format!(
                    "level numbers must be consecutive: {} then {}",
                    prev.level_number, next.level_number
                )));
            }
            if next.min_points != prev.max_points + 1 {
                return Err(EngineError::InvalidLevelCatalog(format!(
                    "level {} range must start at {} (one past level {}'s max), got {}",
                    next.level_number,
                    prev.max_points + 1,
                    prev.level_number,
                    next.min_points
                )));
            }
        }
        for level in &levels {
            if level.min_points > level.max_points {
                return Err(EngineError::InvalidLevelCatalog(format!(
                    "level {} has min {} above max {}",
                    level.level_number, level.min_points, level.max_points
                )));
            }
        }
        Ok(LevelCatalog { levels })
    }

    /// The entry level assigned to a balance created on first grant.
    pub fn first(&self) -> &Level {
        &self.levels[0]
    }

    pub fn get(&self, level_number: i32) -> Option<&Level> {
        self.levels.get((level_number - 1) as usize)
    }

    /// The level immediately above `level_number`, if the ladder goes higher.
    pub fn next_after(&self, level_number: i32) -> Option<&Level> {
        self.get(level_number + 1)
    }

    /// Highest level whose `min_points` does not exceed `total_points`.
    /// This is the steady-state invariant a fully settled balance satisfies;
    /// the single-step transition rule means a balance can lag behind it
    /// transiently after a large grant.
    pub fn level_for_total(&self, total_points: i64) -> &Level {
        self.levels
            .iter()
            .rev()
            .find(|l| l.min_points <= total_points)
            .unwrap_or(self.first())
    }

    pub fn all(&self) -> &[Level] {
        &self.levels
    }

    /// The built-in ladder used by the memory backend and local development.
    /// Mirrors the seed rows in `migrations/001_create_engine.sql`.
    pub fn default_ladder() -> Self {
        let rung = |n: i32, min: i64, max: i64, name: &str, caption: &str| Level {
            level_number: n,
            min_points: min,
            max_points: max,
            name: name.into(),
            caption: caption.into(),
        };
        LevelCatalog::new(vec![
            rung(1, 0, 99, "Spark", "First light"),
            rung(2, 100, 249, "Flicker", "Catching on"),
            rung(3, 250, 499, "Glow", "Warming up"),
            rung(4, 500, 999, "Shine", "Hard to miss"),
            rung(5, 1000, 1999, "Radiance", "Lighting the way"),
            rung(6, 2000, 4999, "Luminary", "Others navigate by you"),
            rung(7, 5000, i64::MAX, "Supernova", "Off the charts"),
        ])
        .expect("default ladder is well-formed")
    }
}
