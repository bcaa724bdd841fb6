//! Award API — the entry point for content, poll, game, and referral
//! handlers, plus balance and history reads.

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{engine_error_response, AppState};
use crate::ledger::PointsSource;
use crate::Segment;

#[derive(Deserialize)]
pub(super) struct AwardPayload {
    user_id: Uuid,
    points: i64,
    source: PointsSource,
    description: String,
    segment: Segment,
}

pub(super) async fn handler_award_points(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AwardPayload>,
) -> impl IntoResponse {
    if payload.points < 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "points must be non-negative"})),
        )
            .into_response();
    }
    if payload.source == PointsSource::GameCompletion
        && payload.points > state.engine.config.awards.game_max_beams
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!(
                    "game score exceeds the {} beam cap",
                    state.engine.config.awards.game_max_beams
                )
            })),
        )
            .into_response();
    }

    match state
        .engine
        .orchestrator
        .award_points(
            payload.user_id,
            payload.points,
            payload.source,
            &payload.description,
            payload.segment,
            Utc::now(),
        )
        .await
    {
        Ok(outcome) => {
            state.prom_metrics.observe_grant(
                payload.source.as_str(),
                payload.points,
                outcome.leveled_up,
            );
            Json(serde_json::json!({
                "balance": outcome.balance,
                "leveled_up": outcome.leveled_up,
                "level": outcome.new_level,
                "window_points": outcome.window_points,
            }))
            .into_response()
        }
        Err(e) => engine_error_response(&e).into_response(),
    }
}

#[derive(Deserialize)]
pub(super) struct VerifyReferralPayload {
    user_id: Uuid,
    segment: Segment,
}

pub(super) async fn handler_verify_referral(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VerifyReferralPayload>,
) -> impl IntoResponse {
    match state
        .engine
        .record_referral_verification(payload.user_id, payload.segment, Utc::now())
        .await
    {
        Ok(outcome) => {
            state.prom_metrics.observe_grant(
                PointsSource::ReferralBonus.as_str(),
                state.engine.config.awards.referral_bonus_beams,
                outcome.leveled_up,
            );
            Json(serde_json::json!({
                "balance": outcome.balance,
                "leveled_up": outcome.leveled_up,
                "level": outcome.new_level,
            }))
            .into_response()
        }
        Err(e) => engine_error_response(&e).into_response(),
    }
}

pub(super) async fn handler_user_balance(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> impl IntoResponse {
    match state.engine.balance.balance(id).await {
        Ok(Some(balance)) => {
            let level = state.engine.levels.get(balance.level_number).cloned();
            Json(serde_json::json!({ "balance": balance, "level": level })).into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "no balance recorded for user"})),
        )
            .into_response(),
        Err(e) => engine_error_response(&e).into_response(),
    }
}

#[derive(Deserialize)]
pub(super) struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

pub(super) async fn handler_user_history(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    match state.engine.ledger.history(id, query.limit).await {
        Ok(entries) => Json(serde_json::json!({ "history": entries })).into_response(),
        Err(e) => engine_error_response(&e).into_response(),
    }
}
