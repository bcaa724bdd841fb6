//! # API — HTTP Surface for the Platform Handlers
//!
//! Runs an Axum HTTP server exposing the engine to the platform's content,
//! poll, game, and referral handlers, plus read endpoints for the frontend
//! (balance, history, leaderboard, achievements, notifications) and the
//! operational triplet (`/healthz`, `/readyz`, `/metrics`).

mod routes_achievements;
mod routes_health;
mod routes_leaderboard;
mod routes_notifications;
mod routes_points;

use crate::notify::BufferedSink;
use crate::orchestrator::Engine;
use crate::{db, prom_metrics, sweeper, EngineError};
use anyhow::Result;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, Instrument};

pub struct AppState {
    pub engine: Engine,
    /// Present when backed by PostgreSQL; drives the readiness probe.
    pub db: Option<db::Database>,
    /// The buffered sink the engine's notifications land in.
    pub notifications: Arc<BufferedSink>,
    pub prom_metrics: prom_metrics::Metrics,
}

impl AppState {
    pub fn with_engine(
        engine: Engine,
        db: Option<db::Database>,
        notifications: Arc<BufferedSink>,
    ) -> Arc<Self> {
        Arc::new(AppState {
            engine,
            db,
            notifications,
            prom_metrics: prom_metrics::Metrics::new(),
        })
    }
}

/// Map an engine error to its HTTP shape. `AchievementNotFound` is a catalog
/// misconfiguration, not a client error, so it surfaces as a 500.
pub(super) fn engine_error_response(e: &EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        EngineError::UserNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::UnknownSegment(_) => StatusCode::BAD_REQUEST,
        EngineError::WindowClosed { .. } => StatusCode::CONFLICT,
        EngineError::InsufficientBalance { .. } => StatusCode::CONFLICT,
        EngineError::AchievementNotFound(_)
        | EngineError::InvalidLevelCatalog(_)
        | EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

/// Middleware that records HTTP request duration into the Prometheus
/// histogram, generates (or propagates) a request ID for correlation, and
/// wraps the request in a tracing span using `.instrument()` for proper
/// async propagation.
async fn metrics_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> axum::response::Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let response = next.run(req).instrument(span).await;

    let duration = start.elapsed().as_secs_f64();
    state
        .prom_metrics
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: norm_path,
        })
        .observe(duration);

    let mut response = response;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Normalize URL path to collapse high-cardinality segments (UUIDs, numeric
/// IDs) into placeholders, preventing histogram label explosion.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.is_empty() {
                seg.to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if seg.len() == 36 && seg.chars().filter(|c| *c == '-').count() == 4 {
                ":uuid".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/points/award",
            post(routes_points::handler_award_points),
        )
        .route(
            "/api/referrals/verify",
            post(routes_points::handler_verify_referral),
        )
        .route(
            "/api/users/{id}/balance",
            get(routes_points::handler_user_balance),
        )
        .route(
            "/api/users/{id}/history",
            get(routes_points::handler_user_history),
        )
        .route(
            "/api/leaderboard",
            get(routes_leaderboard::handler_leaderboard),
        )
        .route(
            "/api/leaderboard/sweep",
            post(routes_leaderboard::handler_sweep),
        )
        .route("/api/levels", get(routes_leaderboard::handler_levels))
        .route(
            "/api/achievements",
            get(routes_achievements::handler_catalog),
        )
        .route(
            "/api/achievements/increment",
            post(routes_achievements::handler_increment),
        )
        .route(
            "/api/achievements/claim",
            post(routes_achievements::handler_claim),
        )
        .route(
            "/api/users/{id}/achievements",
            get(routes_achievements::handler_user_achievements),
        )
        .route(
            "/api/notifications",
            get(routes_notifications::handler_notifications),
        )
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz))
        .route("/metrics", get(routes_health::handler_metrics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(256 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .with_state(state)
}

/// Serve the API and run the periodic finalize-and-sweep loop.
pub async fn run(state: Arc<AppState>, bind: &str, sweep_interval: Duration) -> Result<()> {
    let app = build_router(state.clone());

    let sweep_state = state.clone();
    tokio::spawn(async move {
        sweeper::run_loop(sweep_state, sweep_interval).await;
    });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind = %bind, "beamline API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_collapses_ids() {
        assert_eq!(normalize_path("/api/users/42/balance"), "/api/users/:id/balance");
        assert_eq!(
            normalize_path("/api/users/4bde8a52-7e85-4f1b-9a2c-1f64c1a6e0a7/history"),
            "/api/users/:uuid/history"
        );
        assert_eq!(normalize_path("/api/leaderboard"), "/api/leaderboard");
    }
}
