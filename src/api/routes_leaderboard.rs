//! Leaderboard API — current standings, level catalog, and the admin sweep
//! trigger.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use super::{engine_error_response, AppState};
use crate::finalizer::SweepOutcome;
use crate::Segment;

#[derive(Deserialize)]
pub(super) struct LeaderboardQuery {
    segment: Segment,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

pub(super) async fn handler_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> impl IntoResponse {
    let now = Utc::now();
    let window = state.engine.board.current_window(now);
    match state.engine.board.top(&window, query.segment, query.limit).await {
        Ok(entries) => Json(serde_json::json!({
            "window": window,
            "segment": query.segment,
            "entries": entries,
        }))
        .into_response(),
        Err(e) => engine_error_response(&e).into_response(),
    }
}

#[derive(Deserialize)]
pub(super) struct SweepPayload {
    segment: Segment,
}

/// Finalize any ended windows for the segment, then run the achievement
/// sweep. The same operation the periodic sweeper performs, exposed for
/// operators.
pub(super) async fn handler_sweep(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SweepPayload>,
) -> impl IntoResponse {
    let now = Utc::now();
    let finalized = match state
        .engine
        .finalizer
        .finalize_due_windows(payload.segment, now)
        .await
    {
        Ok(n) => n,
        Err(e) => return engine_error_response(&e).into_response(),
    };
    state
        .prom_metrics
        .windows_finalized_total
        .inc_by(finalized as u64);

    match state
        .engine
        .finalizer
        .sweep_achievements(payload.segment, now)
        .await
    {
        Ok(outcome) => {
            let summary = match &outcome {
                SweepOutcome::NothingToSweep => serde_json::json!({"swept": false}),
                SweepOutcome::InsufficientParticipants { participants, .. } => {
                    serde_json::json!({"swept": false, "participants": participants})
                }
                SweepOutcome::AlreadyCalculated { .. } => {
                    serde_json::json!({"swept": false, "already_calculated": true})
                }
                SweepOutcome::Swept {
                    champions, top_ten, ..
                } => serde_json::json!({
                    "swept": true,
                    "champions": champions,
                    "top_ten": top_ten,
                }),
            };
            Json(serde_json::json!({ "finalized": finalized, "sweep": summary })).into_response()
        }
        Err(e) => engine_error_response(&e).into_response(),
    }
}

pub(super) async fn handler_levels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "levels": state.engine.levels.all() }))
}
