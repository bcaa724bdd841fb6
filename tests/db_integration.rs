//! Database integration tests for the PostgreSQL backend.
//!
//! All tests require TEST_DATABASE_URL to be set.
//! Run with: TEST_DATABASE_URL=postgres://... cargo test --test db_integration
//!
//! Tests should be run single-threaded to avoid table conflicts:
//!   cargo test --test db_integration -- --test-threads=1

mod common;

use beamline::achievements::AchievementKind;
use beamline::leaderboard::Window;
use beamline::ledger::PointsSource;
use beamline::store::{Store, UserDirectory};
use beamline::{EngineError, Segment};
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

/// Skip the test if TEST_DATABASE_URL is not set.
macro_rules! require_db {
    () => {
        if !common::has_test_db() {
            eprintln!("Skipping: TEST_DATABASE_URL not set");
            return;
        }
    };
}

async fn setup() -> beamline::db::Database {
    common::setup_test_db().await
}

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap()
}

fn window() -> Window {
    Window::containing(fixed_now(), 7)
}

/// Insert a user row, optionally referred.
async fn insert_user(db: &beamline::db::Database, referred_by: Option<Uuid>) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, referred_by_id) VALUES ($1, $2)")
        .bind(id)
        .bind(referred_by)
        .execute(db.pool())
        .await
        .unwrap();
    id
}

// ── Balances and ledger ────────────────────────────────────────

#[tokio::test]
async fn credit_creates_then_increments() {
    require_db!();
    let db = setup().await;
    let user = insert_user(&db, None).await;

    let balance = db.credit_balance(user, 40).await.unwrap();
    assert_eq!(balance.total_points, 40);
    assert_eq!(balance.level_number, 1);

    let balance = db.credit_balance(user, 15).await.unwrap();
    assert_eq!(balance.total_points, 55);
}

#[tokio::test]
async fn promote_level_is_conditional() {
    require_db!();
    let db = setup().await;
    let user = insert_user(&db, None).await;
    db.credit_balance(user, 150).await.unwrap();

    assert!(db.promote_level(user, 1, 2).await.unwrap());
    assert!(!db.promote_level(user, 1, 2).await.unwrap());
    let balance = db.get_balance(user).await.unwrap().unwrap();
    assert_eq!(balance.level_number, 2);
}

#[tokio::test]
async fn transactional_grant_writes_balance_and_history_together() {
    require_db!();
    let db = setup().await;
    let user = insert_user(&db, None).await;

    let balance = db
        .credit_and_record(
            user,
            60,
            PointsSource::ContentCompletion,
            "Topic X",
            fixed_now(),
        )
        .await
        .unwrap();
    assert_eq!(balance.total_points, 60);

    let history = db.history(user, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].points, 60);
    assert_eq!(history[0].source, PointsSource::ContentCompletion);
    assert_eq!(history[0].description, "Topic X");
}

// ── Leaderboard ────────────────────────────────────────────────

#[tokio::test]
async fn score_upsert_creates_then_increments() {
    require_db!();
    let db = setup().await;
    let user = insert_user(&db, None).await;
    let w = window();

    let entry = db
        .upsert_score(user, &w, Segment::Student, 30, fixed_now())
        .await
        .unwrap();
    assert_eq!(entry.points, 30);
    assert_eq!(entry.rank, 1);

    let entry = db
        .upsert_score(user, &w, Segment::Student, 12, fixed_now())
        .await
        .unwrap();
    assert_eq!(entry.points, 42);
}

#[tokio::test]
async fn announced_window_rejects_scores() {
    require_db!();
    let db = setup().await;
    let user = insert_user(&db, None).await;
    let w = window();

    assert!(db.announce_window(&w, Segment::Student).await.unwrap());
    assert!(!db.announce_window(&w, Segment::Student).await.unwrap());

    let err = db
        .upsert_score(user, &w, Segment::Student, 10, fixed_now())
        .await
        .unwrap_err();
    assert!(err.is_window_closed());
}

#[tokio::test]
async fn negative_delta_cannot_underflow() {
    require_db!();
    let db = setup().await;
    let user = insert_user(&db, None).await;
    let w = window();

    db.upsert_score(user, &w, Segment::General, 5, fixed_now())
        .await
        .unwrap();
    let err = db
        .upsert_score(user, &w, Segment::General, -6, fixed_now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBalance { .. }));

    let entries = db.window_entries(&w, Segment::General).await.unwrap();
    assert_eq!(entries[0].points, 5);
}

#[tokio::test]
async fn ranks_persist_in_batch() {
    require_db!();
    let db = setup().await;
    let w = window();
    let mut users = Vec::new();
    for i in 0..3 {
        let user = insert_user(&db, None).await;
        db.upsert_score(
            user,
            &w,
            Segment::Student,
            100 - i * 25,
            fixed_now() + Duration::seconds(i),
        )
        .await
        .unwrap();
        users.push(user);
    }

    db.write_ranks(&w, Segment::Student, &[(users[0], 1), (users[1], 2), (users[2], 3)])
        .await
        .unwrap();

    let entries = db.window_entries(&w, Segment::Student).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].user_id, users[0]);
    assert_eq!(entries[0].rank, 1);
    assert_eq!(entries[2].rank, 3);
}

#[tokio::test]
async fn sweepable_window_tracking() {
    require_db!();
    let db = setup().await;
    let user = insert_user(&db, None).await;
    let w = window();
    db.upsert_score(user, &w, Segment::Student, 10, fixed_now())
        .await
        .unwrap();

    let after_end = w.end + Duration::hours(1);
    assert_eq!(
        db.latest_sweepable_window(Segment::Student, after_end)
            .await
            .unwrap(),
        Some(w)
    );
    assert_eq!(
        db.unannounced_ended_windows(Segment::Student, after_end)
            .await
            .unwrap(),
        vec![w]
    );

    assert!(db
        .try_mark_achievements_calculated(&w, Segment::Student)
        .await
        .unwrap());
    assert!(!db
        .try_mark_achievements_calculated(&w, Segment::Student)
        .await
        .unwrap());
    assert!(db
        .latest_sweepable_window(Segment::Student, after_end)
        .await
        .unwrap()
        .is_none());
}

// ── Achievements ───────────────────────────────────────────────

#[tokio::test]
async fn progress_caps_and_claim_flips_once() {
    require_db!();
    let db = setup().await;
    let user = insert_user(&db, None).await;
    let kind = AchievementKind::WeeklyTopTen;

    let b1 = db.bump_progress(user, kind, 2, fixed_now()).await.unwrap();
    assert!(!b1.newly_completed);
    let b2 = db.bump_progress(user, kind, 2, fixed_now()).await.unwrap();
    assert!(b2.newly_completed);
    let b3 = db.bump_progress(user, kind, 2, fixed_now()).await.unwrap();
    assert!(!b3.newly_completed);
    assert_eq!(b3.progress, 2);

    assert!(db.try_claim_reward(user, kind).await.unwrap());
    assert!(!db.try_claim_reward(user, kind).await.unwrap());

    let progress = db.get_progress(user, kind).await.unwrap().unwrap();
    assert_eq!(progress.progress, 2);
    assert!(progress.completed);
    assert!(progress.reward_claimed);
}

// ── Directory and reference data ───────────────────────────────

#[tokio::test]
async fn referrer_lookup_and_missing_user() {
    require_db!();
    let db = setup().await;
    let referrer = insert_user(&db, None).await;
    let referred = insert_user(&db, Some(referrer)).await;

    assert_eq!(db.referrer_of(referred).await.unwrap(), Some(referrer));
    assert_eq!(db.referrer_of(referrer).await.unwrap(), None);
    let err = db.referrer_of(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, EngineError::UserNotFound(_)));
}

#[tokio::test]
async fn level_catalog_loads_and_validates() {
    require_db!();
    let db = setup().await;
    let catalog = db.load_level_catalog().await.unwrap();
    assert_eq!(catalog.first().level_number, 1);
    assert!(catalog.all().len() >= 7);
    assert_eq!(catalog.level_for_total(150).level_number, 2);
}
