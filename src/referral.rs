//! # Referral Propagation — One-Hop Network Share
//!
//! When a referred user earns beams, a fixed fraction flows to the referrer:
//! credit, ledger entry, and windowed leaderboard score, with the referrer's
//! own level settled along the way. Propagation is exactly one hop — the
//! referrer's referrer never sees a share from this chain — which bounds
//! fan-out and rules out cycles. A self-referential edge should be rejected
//! at referral creation, but the propagator ignores one defensively anyway.
//!
//! The share is computed in basis points with integer math and floored to a
//! whole beam; a share that floors to zero skips propagation entirely rather
//! than writing zero-point ledger noise.

use crate::balance::BalanceAndLevel;
use crate::config::BPS_DENOMINATOR;
use crate::leaderboard::LeaderboardWindow;
use crate::ledger::PointsSource;
use crate::store::{Store, UserDirectory};
use crate::{EngineResult, Segment};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Floored share of `amount` at `share_bps` basis points.
pub fn network_share(amount: i64, share_bps: i64) -> i64 {
    debug_assert!((0..=BPS_DENOMINATOR).contains(&share_bps));
    if amount <= 0 {
        return 0;
    }
    amount * share_bps / BPS_DENOMINATOR
}

/// What a propagation call did, for logging and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropagationOutcome {
    /// No referrer on record (or a self-referential edge was ignored).
    NoReferrer,
    /// The computed share floored to zero beams.
    ShareTooSmall,
    /// The referrer was credited `share` beams.
    Forwarded { referrer: Uuid, share: i64 },
}

pub struct ReferralPropagator {
    store: Arc<dyn Store>,
    directory: Arc<dyn UserDirectory>,
    balance: Arc<BalanceAndLevel>,
    board: Arc<LeaderboardWindow>,
    share_bps: i64,
}

impl ReferralPropagator {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<dyn UserDirectory>,
        balance: Arc<BalanceAndLevel>,
        board: Arc<LeaderboardWindow>,
        share_bps: i64,
    ) -> Self {
        ReferralPropagator {
            store,
            directory,
            balance,
            board,
            share_bps,
        }
    }

    /// Forward the network share of `granted_points` to the user's referrer,
    /// if any. The referrer's credit and ledger entry are one atomic write;
    /// their leaderboard score is updated in the same window the grant
    /// occurred in, tolerating a closed window the same way the primary
    /// grant does.
    pub async fn propagate_to_referrer(
        &self,
        user: Uuid,
        granted_points: i64,
        source_description: &str,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<PropagationOutcome> {
        let referrer = match self.directory.referrer_of(user).await? {
            Some(r) if r != user => r,
            Some(_) => {
                warn!(user = %user, "ignoring self-referential referral edge");
                return Ok(PropagationOutcome::NoReferrer);
            }
            None => return Ok(PropagationOutcome::NoReferrer),
        };

        let share = network_share(granted_points, self.share_bps);
        if share == 0 {
            return Ok(PropagationOutcome::ShareTooSmall);
        }

        let description = format!("Network share: {}", source_description);
        let credited = self
            .store
            .credit_and_record(
                referrer,
                share,
                PointsSource::ReferralNetworkShare,
                &description,
                now,
            )
            .await?;
        self.balance.settle_level(credited).await?;

        match self.board.upsert_score(referrer, segment, share, now).await {
            Ok(_) => {
                let window = self.board.current_window(now);
                self.board.recompute_ranks(&window, segment).await?;
            }
            Err(e) if e.is_window_closed() => {
                debug!(referrer = %referrer, "window closed, share credited to balance only");
            }
            Err(e) => return Err(e),
        }

        Ok(PropagationOutcome::Forwarded { referrer, share })
    }
}
