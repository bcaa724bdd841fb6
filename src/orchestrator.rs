//! # Points Orchestrator — The Award Façade
//!
//! `award_points` is the single entry point every qualifying user action goes
//! through: content completions, poll votes, game finishes, referral bonuses,
//! and achievement reward claims. One call credits the balance and writes the
//! ledger entry (atomically), settles the level, folds the grant into the
//! current leaderboard window, recomputes ranks, and forwards the network
//! share to a referrer if there is one.
//!
//! Failure policy: the primary credit is all-or-nothing with its ledger
//! entry; a closed leaderboard window downgrades to "credited but not ranked
//! this period"; referral-side failures are logged and never unwind the
//! primary grant.

use crate::achievements::{AchievementKind, AchievementTracker};
use crate::balance::{BalanceAndLevel, CreditOutcome, UserBalance};
use crate::config::EngineConfig;
use crate::leaderboard::LeaderboardWindow;
use crate::ledger::{PointsLedger, PointsSource};
use crate::levels::{Level, LevelCatalog};
use crate::referral::ReferralPropagator;
use crate::store::{Store, UserDirectory};
use crate::{EngineResult, NotificationKind, NotificationSink, Segment};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

/// Result of a completed award call, for the primary user only; referrer-side
/// results are not surfaced to the original caller.
#[derive(Clone, Debug)]
pub struct AwardOutcome {
    pub balance: UserBalance,
    pub leveled_up: bool,
    pub new_level: Level,
    /// The user's windowed score after this grant, or None when the window
    /// was already closed.
    pub window_points: Option<i64>,
}

/// Result of a reward claim.
#[derive(Clone, Debug)]
pub enum ClaimOutcome {
    /// This call performed the payout.
    Claimed(AwardOutcome),
    /// The reward was already paid out; nothing credited.
    AlreadyClaimed,
}

pub struct PointsOrchestrator {
    store: Arc<dyn Store>,
    directory: Arc<dyn UserDirectory>,
    sink: Arc<dyn NotificationSink>,
    balance: Arc<BalanceAndLevel>,
    board: Arc<LeaderboardWindow>,
    referral: Arc<ReferralPropagator>,
}

impl PointsOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<dyn UserDirectory>,
        sink: Arc<dyn NotificationSink>,
        balance: Arc<BalanceAndLevel>,
        board: Arc<LeaderboardWindow>,
        referral: Arc<ReferralPropagator>,
    ) -> Self {
        PointsOrchestrator {
            store,
            directory,
            sink,
            balance,
            board,
            referral,
        }
    }

    /// Award `points` beams to a user for an action. See the module docs for
    /// the step ordering and failure policy.
    pub async fn award_points(
        &self,
        user: Uuid,
        points: i64,
        source: PointsSource,
        description: &str,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<AwardOutcome> {
        // Validates the user exists before anything is written.
        self.directory.referrer_of(user).await?;

        let credited = self
            .store
            .credit_and_record(user, points, source, description, now)
            .await?;
        let CreditOutcome {
            balance,
            leveled_up,
            new_level,
        } = self.balance.settle_level(credited).await?;

        let window = self.board.current_window(now);
        let window_points = match self.board.upsert_score(user, segment, points, now).await {
            Ok(entry) => {
                self.board.recompute_ranks(&window, segment).await?;
                Some(entry.points)
            }
            Err(e) if e.is_window_closed() => {
                warn!(user = %user, "grant landed after window closed, not ranked this period");
                None
            }
            Err(e) => return Err(e),
        };

        // Best-effort relative to the primary grant: a referrer-side failure
        // is surfaced in the logs, never to the caller.
        if source != PointsSource::ReferralNetworkShare {
            if let Err(e) = self
                .referral
                .propagate_to_referrer(user, points, description, segment, now)
                .await
            {
                warn!(user = %user, error = %e, "referral share propagation failed");
            }
        }

        Ok(AwardOutcome {
            balance,
            leveled_up,
            new_level,
            window_points,
        })
    }

    /// Pay out a completed achievement. The claim flag flips first, as a
    /// conditional storage update, then the reward flows through the normal
    /// award path. If the credit fails after the flip, the flag stays set —
    /// re-opening it would re-open the double-claim race — and the failure is
    /// logged for reconciliation.
    pub async fn claim_achievement_reward(
        &self,
        user: Uuid,
        kind: AchievementKind,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<ClaimOutcome> {
        if !self.store.try_claim_reward(user, kind).await? {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let spec = kind.spec();
        match self
            .award_points(
                user,
                spec.beams_to_gain,
                PointsSource::AchievementReward,
                spec.title,
                segment,
                now,
            )
            .await
        {
            Ok(outcome) => {
                self.sink.send(
                    user,
                    NotificationKind::RewardClaimed,
                    &format!("{} beams for {}", spec.beams_to_gain, spec.title),
                    Some("/achievements"),
                );
                Ok(ClaimOutcome::Claimed(outcome))
            }
            Err(e) => {
                error!(
                    user = %user,
                    achievement = %kind,
                    error = %e,
                    "reward credit failed after claim flag flip, needs reconciliation"
                );
                Err(e)
            }
        }
    }
}

/// Fully wired engine: one construction point shared by the API server, the
/// sweeper, and the CLI.
pub struct Engine {
    pub store: Arc<dyn Store>,
    pub directory: Arc<dyn UserDirectory>,
    pub sink: Arc<dyn NotificationSink>,
    pub levels: Arc<LevelCatalog>,
    pub config: EngineConfig,
    pub balance: Arc<BalanceAndLevel>,
    pub ledger: Arc<PointsLedger>,
    pub board: Arc<LeaderboardWindow>,
    pub tracker: Arc<AchievementTracker>,
    pub finalizer: Arc<crate::finalizer::LeaderboardFinalizer>,
    pub orchestrator: Arc<PointsOrchestrator>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<dyn UserDirectory>,
        sink: Arc<dyn NotificationSink>,
        levels: LevelCatalog,
        config: EngineConfig,
    ) -> Self {
        let levels = Arc::new(levels);
        let balance = Arc::new(BalanceAndLevel::new(store.clone(), levels.clone()));
        let ledger = Arc::new(PointsLedger::new(store.clone()));
        let board = Arc::new(LeaderboardWindow::new(
            store.clone(),
            config.leaderboard.window_days,
        ));
        let tracker = Arc::new(AchievementTracker::new(store.clone(), sink.clone()));
        let referral = Arc::new(ReferralPropagator::new(
            store.clone(),
            directory.clone(),
            balance.clone(),
            board.clone(),
            config.referral.network_share_bps,
        ));
        let finalizer = Arc::new(crate::finalizer::LeaderboardFinalizer::new(
            store.clone(),
            board.clone(),
            tracker.clone(),
            config.leaderboard.min_sweep_participants,
            config.leaderboard.top_cutoff as i32,
        ));
        let orchestrator = Arc::new(PointsOrchestrator::new(
            store.clone(),
            directory.clone(),
            sink.clone(),
            balance.clone(),
            board.clone(),
            referral,
        ));
        Engine {
            store,
            directory,
            sink,
            levels,
            config,
            balance,
            ledger,
            board,
            tracker,
            finalizer,
            orchestrator,
        }
    }

    /// Memory-backed engine with the default ladder and config — the test
    /// and local-development configuration.
    pub fn in_memory(
        directory: Arc<dyn UserDirectory>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Engine::new(
            Arc::new(crate::store::MemoryStore::new()),
            directory,
            sink,
            LevelCatalog::default_ladder(),
            EngineConfig::default(),
        )
    }

    /// Record a verified referral: the new user gets the signup bonus (the
    /// network share flows to the referrer through the normal award path),
    /// and the referrer's growth-ambassador badge advances one step.
    pub async fn record_referral_verification(
        &self,
        new_user: Uuid,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<AwardOutcome> {
        let outcome = self
            .orchestrator
            .award_points(
                new_user,
                self.config.awards.referral_bonus_beams,
                PointsSource::ReferralBonus,
                "Welcome aboard",
                segment,
                now,
            )
            .await?;

        match self.directory.referrer_of(new_user).await? {
            Some(referrer) if referrer != new_user => {
                self.tracker
                    .increment_progress(referrer, AchievementKind::GrowthAmbassador, now)
                    .await?;
            }
            _ => {}
        }
        Ok(outcome)
    }
}
