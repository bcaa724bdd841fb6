//! End-to-end engine tests over the in-memory backend.
//!
//! Exercises the full award path (credit, ledger, level settlement,
//! leaderboard, referral share), window finalization, the achievement sweep,
//! and reward claims, with fixed timestamps for deterministic windows.

mod common;

use beamline::achievements::AchievementKind;
use beamline::ledger::PointsSource;
use beamline::finalizer::SweepOutcome;
use beamline::orchestrator::ClaimOutcome;
use beamline::{NotificationKind, Segment};
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{memory_engine, TestHarness};
use uuid::Uuid;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap()
}

fn new_user(harness: &TestHarness) -> Uuid {
    let user = Uuid::new_v4();
    harness.directory.add_user(user, None);
    user
}

fn referred_user(harness: &TestHarness, referrer: Uuid) -> Uuid {
    let user = Uuid::new_v4();
    harness.directory.add_user(user, Some(referrer));
    user
}

// ── Award path ─────────────────────────────────────────────────

#[tokio::test]
async fn first_award_creates_balance_history_and_leaderboard_entry() {
    let harness = memory_engine();
    let user = new_user(&harness);

    let outcome = harness
        .engine
        .orchestrator
        .award_points(
            user,
            100,
            PointsSource::ContentCompletion,
            "Topic X",
            Segment::Student,
            now(),
        )
        .await
        .unwrap();

    // 100 beams clears level 1 (0..=99): one level-up, to level 2.
    assert_eq!(outcome.balance.total_points, 100);
    assert!(outcome.leveled_up);
    assert_eq!(outcome.new_level.level_number, 2);
    assert_eq!(outcome.window_points, Some(100));

    let history = harness.engine.ledger.history(user, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].points, 100);
    assert_eq!(history[0].source, PointsSource::ContentCompletion);
    assert_eq!(history[0].description, "Topic X");

    let window = harness.engine.board.current_window(now());
    let top = harness
        .engine
        .board
        .top(&window, Segment::Student, 10)
        .await
        .unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].user_id, user);
    assert_eq!(top[0].points, 100);
    assert_eq!(top[0].rank, 1);
}

#[tokio::test]
async fn award_to_unknown_user_fails_before_any_write() {
    let harness = memory_engine();
    let ghost = Uuid::new_v4();

    let err = harness
        .engine
        .orchestrator
        .award_points(
            ghost,
            50,
            PointsSource::PollParticipation,
            "Poll",
            Segment::General,
            now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, beamline::EngineError::UserNotFound(_)));
    assert!(harness.engine.balance.balance(ghost).await.unwrap().is_none());
    assert!(harness.engine.ledger.history(ghost, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn landing_exactly_on_max_points_does_not_level_up() {
    let harness = memory_engine();
    let user = new_user(&harness);

    // Level 1 spans 0..=99.
    let outcome = harness
        .engine
        .orchestrator
        .award_points(
            user,
            99,
            PointsSource::GameCompletion,
            "Word hunt",
            Segment::General,
            now(),
        )
        .await
        .unwrap();
    assert!(!outcome.leveled_up);
    assert_eq!(outcome.new_level.level_number, 1);

    // One more beam crosses the boundary.
    let outcome = harness
        .engine
        .orchestrator
        .award_points(
            user,
            1,
            PointsSource::PollParticipation,
            "Daily poll",
            Segment::General,
            now(),
        )
        .await
        .unwrap();
    assert!(outcome.leveled_up);
    assert_eq!(outcome.new_level.level_number, 2);
}

#[tokio::test]
async fn grant_across_two_boundaries_advances_one_level_per_call() {
    let harness = memory_engine();
    let user = new_user(&harness);

    // 300 beams spans level 1 (0..=99) and level 2 (100..=249) in one grant.
    let outcome = harness
        .engine
        .orchestrator
        .award_points(
            user,
            300,
            PointsSource::GameCompletion,
            "Marathon",
            Segment::General,
            now(),
        )
        .await
        .unwrap();
    assert!(outcome.leveled_up);
    assert_eq!(outcome.new_level.level_number, 2);

    // The next grant picks up the remaining step.
    let outcome = harness
        .engine
        .orchestrator
        .award_points(
            user,
            1,
            PointsSource::PollParticipation,
            "Poll",
            Segment::General,
            now(),
        )
        .await
        .unwrap();
    assert!(outcome.leveled_up);
    assert_eq!(outcome.new_level.level_number, 3);
}

// ── Referral propagation ───────────────────────────────────────

#[tokio::test]
async fn referrer_receives_floored_share_with_ledger_and_leaderboard() {
    let harness = memory_engine();
    let referrer = new_user(&harness);
    let user = referred_user(&harness, referrer);

    harness
        .engine
        .orchestrator
        .award_points(
            user,
            50,
            PointsSource::PollParticipation,
            "Season poll",
            Segment::Student,
            now(),
        )
        .await
        .unwrap();

    // Default share is 20%: floor(50 * 0.2) = 10.
    let balance = harness.engine.balance.balance(referrer).await.unwrap().unwrap();
    assert_eq!(balance.total_points, 10);

    let history = harness.engine.ledger.history(referrer, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].points, 10);
    assert_eq!(history[0].source, PointsSource::ReferralNetworkShare);

    let window = harness.engine.board.current_window(now());
    let top = harness
        .engine
        .board
        .top(&window, Segment::Student, 10)
        .await
        .unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].user_id, user);
    assert_eq!(top[0].rank, 1);
    assert_eq!(top[1].user_id, referrer);
    assert_eq!(top[1].points, 10);
    assert_eq!(top[1].rank, 2);
}

#[tokio::test]
async fn share_propagates_exactly_one_hop() {
    let harness = memory_engine();
    let grandparent = new_user(&harness);
    let parent = referred_user(&harness, grandparent);
    let child = referred_user(&harness, parent);

    harness
        .engine
        .orchestrator
        .award_points(
            child,
            100,
            PointsSource::ContentCompletion,
            "Topic",
            Segment::General,
            now(),
        )
        .await
        .unwrap();

    let parent_balance = harness.engine.balance.balance(parent).await.unwrap().unwrap();
    assert_eq!(parent_balance.total_points, 20);
    // The chain stops at one hop.
    assert!(harness
        .engine
        .balance
        .balance(grandparent)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn self_referential_edge_is_ignored_defensively() {
    let harness = memory_engine();
    let user = Uuid::new_v4();
    // A corrupt directory entry pointing a user at themselves must not
    // recurse or double-credit.
    harness.directory.add_user(user, Some(user));

    let outcome = harness
        .engine
        .orchestrator
        .award_points(
            user,
            50,
            PointsSource::PollParticipation,
            "Poll",
            Segment::General,
            now(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.balance.total_points, 50);

    // Exactly one ledger entry: the grant itself, no share.
    let history = harness.engine.ledger.history(user, 10).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn tiny_grant_share_floors_to_zero_and_skips_referrer() {
    let harness = memory_engine();
    let referrer = new_user(&harness);
    let user = referred_user(&harness, referrer);

    harness
        .engine
        .orchestrator
        .award_points(
            user,
            4,
            PointsSource::PollParticipation,
            "Quick poll",
            Segment::General,
            now(),
        )
        .await
        .unwrap();

    // floor(4 * 0.2) = 0: no balance row, no ledger noise.
    assert!(harness.engine.balance.balance(referrer).await.unwrap().is_none());
    assert!(harness
        .engine
        .ledger
        .history(referrer, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn referral_verification_awards_bonus_and_ambassador_progress() {
    let harness = memory_engine();
    let referrer = new_user(&harness);
    let user = referred_user(&harness, referrer);

    let outcome = harness
        .engine
        .record_referral_verification(user, Segment::General, now())
        .await
        .unwrap();
    assert_eq!(outcome.balance.total_points, 100);

    // Referrer got the share and one growth-ambassador step.
    let balance = harness.engine.balance.balance(referrer).await.unwrap().unwrap();
    assert_eq!(balance.total_points, 20);
    let progress = harness
        .engine
        .tracker
        .progress_for(referrer, AchievementKind::GrowthAmbassador)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.progress, 1);
    assert!(!progress.completed);
}

// ── Window closure ─────────────────────────────────────────────

#[tokio::test]
async fn finalize_window_is_idempotent_and_blocks_scores() {
    let harness = memory_engine();
    let user = new_user(&harness);
    let window = harness.engine.board.current_window(now());

    harness
        .engine
        .orchestrator
        .award_points(
            user,
            30,
            PointsSource::PollParticipation,
            "Poll",
            Segment::Student,
            now(),
        )
        .await
        .unwrap();

    assert!(harness
        .engine
        .finalizer
        .finalize_window(&window, Segment::Student)
        .await
        .unwrap());
    assert!(!harness
        .engine
        .finalizer
        .finalize_window(&window, Segment::Student)
        .await
        .unwrap());

    let err = harness
        .engine
        .board
        .upsert_score(user, Segment::Student, 10, now())
        .await
        .unwrap_err();
    assert!(err.is_window_closed());
}

#[tokio::test]
async fn grant_after_closure_still_credits_balance_and_ledger() {
    let harness = memory_engine();
    let user = new_user(&harness);
    let window = harness.engine.board.current_window(now());
    harness
        .engine
        .finalizer
        .finalize_window(&window, Segment::General)
        .await
        .unwrap();

    let outcome = harness
        .engine
        .orchestrator
        .award_points(
            user,
            40,
            PointsSource::ContentCompletion,
            "Late topic",
            Segment::General,
            now(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.balance.total_points, 40);
    assert_eq!(outcome.window_points, None);
    assert_eq!(harness.engine.ledger.history(user, 10).await.unwrap().len(), 1);
    let top = harness
        .engine
        .board
        .top(&window, Segment::General, 10)
        .await
        .unwrap();
    assert!(top.is_empty());
}

#[tokio::test]
async fn segments_have_independent_windows() {
    let harness = memory_engine();
    let user = new_user(&harness);
    let window = harness.engine.board.current_window(now());
    harness
        .engine
        .finalizer
        .finalize_window(&window, Segment::Student)
        .await
        .unwrap();

    // The general segment still accepts scores.
    let outcome = harness
        .engine
        .orchestrator
        .award_points(
            user,
            10,
            PointsSource::PollParticipation,
            "Poll",
            Segment::General,
            now(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.window_points, Some(10));
}

// ── Achievement sweep ──────────────────────────────────────────

/// Seed `count` users with descending scores in the current window, then
/// move past the window end.
async fn seed_window(
    harness: &TestHarness,
    count: usize,
    segment: Segment,
) -> (Vec<Uuid>, DateTime<Utc>) {
    let mut users = Vec::new();
    for i in 0..count {
        let user = new_user(harness);
        harness
            .engine
            .orchestrator
            .award_points(
                user,
                (100 - i as i64 * 10).max(1),
                PointsSource::GameCompletion,
                "Game",
                segment,
                now() + Duration::seconds(i as i64),
            )
            .await
            .unwrap();
        users.push(user);
    }
    let window = harness.engine.board.current_window(now());
    (users, window.end + Duration::hours(1))
}

#[tokio::test]
async fn sweep_grants_champion_and_top_ten_progress() {
    let harness = memory_engine();
    let (users, after_end) = seed_window(&harness, 5, Segment::Student).await;

    let outcome = harness
        .engine
        .finalizer
        .sweep_achievements(Segment::Student, after_end)
        .await
        .unwrap();
    match outcome {
        SweepOutcome::Swept {
            champions, top_ten, ..
        } => {
            assert_eq!(champions, 1);
            assert_eq!(top_ten, 4);
        }
        other => panic!("expected a sweep, got {:?}", other),
    }

    let champion = harness
        .engine
        .tracker
        .progress_for(users[0], AchievementKind::WeeklyChampion)
        .await
        .unwrap()
        .unwrap();
    assert!(champion.completed);

    let runner_up = harness
        .engine
        .tracker
        .progress_for(users[1], AchievementKind::WeeklyTopTen)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(runner_up.progress, 1);
    assert!(!runner_up.completed);

    // The champion did not also get top-ten progress.
    assert!(harness
        .engine
        .tracker
        .progress_for(users[0], AchievementKind::WeeklyTopTen)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn sweep_skips_underpopulated_window_without_marking() {
    let harness = memory_engine();
    let (_, after_end) = seed_window(&harness, 2, Segment::Student).await;

    let outcome = harness
        .engine
        .finalizer
        .sweep_achievements(Segment::Student, after_end)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        SweepOutcome::InsufficientParticipants { participants: 2, .. }
    ));

    // Unmarked: the same window is still the sweep candidate.
    let outcome = harness
        .engine
        .finalizer
        .sweep_achievements(Segment::Student, after_end)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        SweepOutcome::InsufficientParticipants { .. }
    ));
}

#[tokio::test]
async fn sweep_runs_at_most_once_per_window() {
    let harness = memory_engine();
    let (_, after_end) = seed_window(&harness, 4, Segment::General).await;

    let first = harness
        .engine
        .finalizer
        .sweep_achievements(Segment::General, after_end)
        .await
        .unwrap();
    assert!(matches!(first, SweepOutcome::Swept { .. }));

    let second = harness
        .engine
        .finalizer
        .sweep_achievements(Segment::General, after_end)
        .await
        .unwrap();
    assert!(matches!(second, SweepOutcome::NothingToSweep));
}

#[tokio::test]
async fn finalize_due_windows_announces_ended_windows_only() {
    let harness = memory_engine();
    let user = new_user(&harness);
    harness
        .engine
        .orchestrator
        .award_points(
            user,
            10,
            PointsSource::PollParticipation,
            "Poll",
            Segment::Student,
            now(),
        )
        .await
        .unwrap();
    let window = harness.engine.board.current_window(now());

    // Mid-window: nothing due.
    assert_eq!(
        harness
            .engine
            .finalizer
            .finalize_due_windows(Segment::Student, now())
            .await
            .unwrap(),
        0
    );

    // Past the end: the window gets announced exactly once.
    let after_end = window.end + Duration::minutes(5);
    assert_eq!(
        harness
            .engine
            .finalizer
            .finalize_due_windows(Segment::Student, after_end)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        harness
            .engine
            .finalizer
            .finalize_due_windows(Segment::Student, after_end)
            .await
            .unwrap(),
        0
    );
}

// ── Achievement progress and claims ────────────────────────────

#[tokio::test]
async fn completion_notifies_exactly_once_and_caps_progress() {
    let harness = memory_engine();
    let user = new_user(&harness);

    // weekly-top-ten completes at 3.
    for _ in 0..5 {
        harness
            .engine
            .tracker
            .increment_progress(user, AchievementKind::WeeklyTopTen, now())
            .await
            .unwrap();
    }

    let progress = harness
        .engine
        .tracker
        .progress_for(user, AchievementKind::WeeklyTopTen)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.progress, 3);
    assert!(progress.completed);

    let completions: Vec<_> = harness
        .sink
        .recent_for(user, 50)
        .into_iter()
        .filter(|n| n.kind == NotificationKind::AchievementCompleted)
        .collect();
    assert_eq!(completions.len(), 1);
    assert!(completions[0].content.contains("Shining Ten"));
}

#[tokio::test]
async fn claim_pays_once_and_flows_through_award_path() {
    let harness = memory_engine();
    let user = new_user(&harness);
    harness
        .engine
        .tracker
        .increment_progress(user, AchievementKind::WeeklyChampion, now())
        .await
        .unwrap();

    let outcome = harness
        .engine
        .orchestrator
        .claim_achievement_reward(user, AchievementKind::WeeklyChampion, Segment::Student, now())
        .await
        .unwrap();
    let awarded = match outcome {
        ClaimOutcome::Claimed(awarded) => awarded,
        ClaimOutcome::AlreadyClaimed => panic!("first claim must pay out"),
    };
    // weekly-champion pays 250: clears level 1 and 2 in balance terms, but
    // level settles one step.
    assert_eq!(awarded.balance.total_points, 250);

    let history = harness.engine.ledger.history(user, 10).await.unwrap();
    assert_eq!(history[0].source, PointsSource::AchievementReward);

    let again = harness
        .engine
        .orchestrator
        .claim_achievement_reward(user, AchievementKind::WeeklyChampion, Segment::Student, now())
        .await
        .unwrap();
    assert!(matches!(again, ClaimOutcome::AlreadyClaimed));
    let balance = harness.engine.balance.balance(user).await.unwrap().unwrap();
    assert_eq!(balance.total_points, 250);
}

#[tokio::test]
async fn claim_before_completion_reports_already_claimed_shape() {
    let harness = memory_engine();
    let user = new_user(&harness);

    // Nothing completed: the conditional flip matches no row, no credit.
    let outcome = harness
        .engine
        .orchestrator
        .claim_achievement_reward(user, AchievementKind::Trailblazer, Segment::General, now())
        .await
        .unwrap();
    assert!(matches!(outcome, ClaimOutcome::AlreadyClaimed));
    assert!(harness.engine.balance.balance(user).await.unwrap().is_none());
}
