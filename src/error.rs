//! Engine error taxonomy.
//!
//! Storage failures from either backend are funneled into [`EngineError::Storage`]
//! via `anyhow`; everything else is a typed condition callers branch on.
//! `WindowClosed` is the one non-fatal variant for the award path: the balance
//! credit and ledger entry have already landed when it surfaces, only the
//! current period's rank is unaffected.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Referenced user does not exist in the user directory.
    #[error("user {0} not found")]
    UserNotFound(Uuid),

    /// Achievement slug is not in the catalog — a configuration error, not a
    /// user error; should alert operators.
    #[error("achievement '{0}' not in catalog")]
    AchievementNotFound(String),

    /// Segment string did not parse.
    #[error("unknown segment '{0}'")]
    UnknownSegment(String),

    /// Attempted mutation of an announced leaderboard window.
    #[error("leaderboard window {start}..{end} is closed")]
    WindowClosed {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// A debit would drive a windowed point total negative.
    #[error("windowed points for user {user} would drop below zero")]
    InsufficientBalance { user: Uuid },

    /// The level catalog failed validation (gaps, overlaps, or bad ordering).
    #[error("invalid level catalog: {0}")]
    InvalidLevelCatalog(String),

    /// Generic storage-layer failure (connection loss, constraint violation, ...).
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// True for conditions the award path treats as "credited, but not ranked
    /// this period" rather than a hard failure.
    pub fn is_window_closed(&self) -> bool {
        matches!(self, EngineError::WindowClosed { .. })
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Storage(anyhow::Error::new(e))
    }
}
