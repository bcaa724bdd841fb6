//! # Points Ledger — Append-Only Grant History
//!
//! Every beam a user gains is recorded as an immutable history entry: who,
//! how many, why, and when. The ledger is the source of truth for "why did
//! this user gain N beams" and is never updated or deleted by the engine.
//!
//! A failed ledger write is a correctness bug, not an inconvenience (the
//! balance would change with no audit trail), so the award path writes the
//! balance credit and the ledger entry as one storage operation; the
//! standalone `record_grant` here exists for callers that only append.

use crate::store::Store;
use crate::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Why a grant happened. Closed set; the kebab-case slug is the storage and
/// API representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PointsSource {
    ContentCompletion,
    PollParticipation,
    GameCompletion,
    ReferralBonus,
    ReferralNetworkShare,
    AchievementReward,
}

impl PointsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointsSource::ContentCompletion => "content-completion",
            PointsSource::PollParticipation => "poll-participation",
            PointsSource::GameCompletion => "game-completion",
            PointsSource::ReferralBonus => "referral-bonus",
            PointsSource::ReferralNetworkShare => "referral-network-share",
            PointsSource::AchievementReward => "achievement-reward",
        }
    }
}

impl FromStr for PointsSource {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content-completion" => Ok(PointsSource::ContentCompletion),
            "poll-participation" => Ok(PointsSource::PollParticipation),
            "game-completion" => Ok(PointsSource::GameCompletion),
            "referral-bonus" => Ok(PointsSource::ReferralBonus),
            "referral-network-share" => Ok(PointsSource::ReferralNetworkShare),
            "achievement-reward" => Ok(PointsSource::AchievementReward),
            other => Err(EngineError::Storage(anyhow::anyhow!(
                "unknown points source '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PointsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable grant record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointsHistoryEntry {
    pub user_id: Uuid,
    pub points: i64,
    pub source: PointsSource,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Append/read access to the grant history.
pub struct PointsLedger {
    store: Arc<dyn Store>,
}

impl PointsLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        PointsLedger { store }
    }

    /// Append one grant record. Storage failures propagate to the caller —
    /// the orchestrator treats them as fatal to the whole award call.
    pub async fn record_grant(
        &self,
        user: Uuid,
        points: i64,
        source: PointsSource,
        description: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.store
            .append_history(&PointsHistoryEntry {
                user_id: user,
                points,
                source,
                description: description.to_string(),
                created_at: now,
            })
            .await
    }

    /// Most recent entries for a user, newest first.
    pub async fn history(&self, user: Uuid, limit: i64) -> EngineResult<Vec<PointsHistoryEntry>> {
        self.store.history(user, limit).await
    }
}
