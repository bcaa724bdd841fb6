//! Shared test helpers for integration tests.

#![allow(dead_code)]

use beamline::api::AppState;
use beamline::notify::BufferedSink;
use beamline::orchestrator::Engine;
use beamline::store::MemoryDirectory;
use std::sync::Arc;

/// Returns the test database URL from the `TEST_DATABASE_URL` environment
/// variable. Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// Connect to the test database with a fresh schema and empty tables.
pub async fn setup_test_db() -> beamline::db::Database {
    let db = beamline::db::Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    run_migrations(db.pool()).await;
    truncate_all_tables(db.pool()).await;
    db
}

/// Truncate all engine tables to ensure test isolation. The levels table is
/// reference data and keeps its seed rows.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql(
        "TRUNCATE TABLE user_achievements, leaderboard_announcements,
                       leaderboard_entries, points_history, user_balances, users
         CASCADE",
    )
    .execute(pool)
    .await
    .unwrap();
}

/// Run the schema migration against the test database (idempotent DDL).
async fn run_migrations(pool: &sqlx::PgPool) {
    let sql = std::fs::read_to_string("migrations/001_create_engine.sql")
        .expect("migration file missing");
    sqlx::raw_sql(&sql)
        .execute(pool)
        .await
        .expect("migration failed");
}

/// A memory-backed engine plus handles to its collaborators.
pub struct TestHarness {
    pub engine: Engine,
    pub directory: Arc<MemoryDirectory>,
    pub sink: Arc<BufferedSink>,
}

/// Build a memory-backed engine with the default ladder and config.
pub fn memory_engine() -> TestHarness {
    let directory = Arc::new(MemoryDirectory::new());
    let sink = Arc::new(BufferedSink::new());
    let engine = Engine::in_memory(directory.clone(), sink.clone());
    TestHarness {
        engine,
        directory,
        sink,
    }
}

/// A memory-backed Axum app plus handles for seeding users and reading
/// notifications.
pub struct TestApp {
    pub router: axum::Router,
    pub directory: Arc<MemoryDirectory>,
    pub sink: Arc<BufferedSink>,
}

/// Build an Axum test app over a fresh memory store. No database needed.
pub fn build_test_app() -> TestApp {
    let TestHarness {
        engine,
        directory,
        sink,
    } = memory_engine();
    let state = AppState::with_engine(engine, None, sink.clone());
    TestApp {
        router: beamline::api::build_router(state),
        directory,
        sink,
    }
}
