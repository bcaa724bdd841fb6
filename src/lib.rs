pub mod achievements;
pub mod api;
pub mod balance;
pub mod config;
pub mod db;
pub mod error;
pub mod finalizer;
pub mod leaderboard;
pub mod ledger;
pub mod levels;
pub mod notify;
pub mod orchestrator;
pub mod prom_metrics;
pub mod referral;
pub mod store;
pub mod sweeper;

use serde::{Deserialize, Serialize};

pub use error::{EngineError, EngineResult};

/// User-category partition that leaderboards are computed independently per.
/// Every award call carries the acting user's segment; windows, ranks, and
/// announcements never mix segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Student,
    General,
}

impl Segment {
    /// All segments, in sweep order.
    pub const ALL: [Segment; 2] = [Segment::Student, Segment::General];

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Student => "student",
            Segment::General => "general",
        }
    }
}

impl std::str::FromStr for Segment {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Segment::Student),
            "general" => Ok(Segment::General),
            other => Err(EngineError::UnknownSegment(other.to_string())),
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification categories delivered through a [`NotificationSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AchievementCompleted,
    RewardClaimed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::AchievementCompleted => "achievement_completed",
            NotificationKind::RewardClaimed => "reward_claimed",
        }
    }
}

/// Trait for notification delivery (in-process buffer or external push service).
/// Delivery is fire-and-forget: implementations must not block and must swallow
/// their own failures — a lost notification never fails an engine operation.
pub trait NotificationSink: Send + Sync {
    fn send(
        &self,
        user: uuid::Uuid,
        kind: NotificationKind,
        content: &str,
        action_url: Option<&str>,
    );
}
