//! Achievement API — catalog, per-user progress, direct increments from
//! platform handlers, and reward claims.

use axum::extract::{Path as AxumPath, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{engine_error_response, AppState};
use crate::achievements::AchievementKind;
use crate::orchestrator::ClaimOutcome;
use crate::prom_metrics::AchievementLabel;
use crate::Segment;

pub(super) async fn handler_catalog() -> impl IntoResponse {
    let catalog: Vec<_> = AchievementKind::ALL.iter().map(|k| k.spec()).collect();
    Json(serde_json::json!({ "achievements": catalog }))
}

#[derive(Deserialize)]
pub(super) struct IncrementPayload {
    user_id: Uuid,
    achievement: String,
}

/// Advance an achievement one step. Used by handlers reacting to conditions
/// the engine cannot see itself (content streaks, repeated referrals, game
/// finishes).
pub(super) async fn handler_increment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<IncrementPayload>,
) -> impl IntoResponse {
    let kind = match AchievementKind::from_slug(&payload.achievement) {
        Ok(kind) => kind,
        Err(e) => return engine_error_response(&e).into_response(),
    };
    match state
        .engine
        .tracker
        .increment_progress(payload.user_id, kind, Utc::now())
        .await
    {
        Ok(bump) => {
            if bump.newly_completed {
                state
                    .prom_metrics
                    .achievements_completed
                    .get_or_create(&AchievementLabel {
                        achievement: kind.slug().to_string(),
                    })
                    .inc();
            }
            Json(serde_json::json!({
                "progress": bump.progress,
                "completed": bump.completed,
                "first_time_completion": bump.newly_completed,
            }))
            .into_response()
        }
        Err(e) => engine_error_response(&e).into_response(),
    }
}

#[derive(Deserialize)]
pub(super) struct ClaimPayload {
    user_id: Uuid,
    achievement: String,
    segment: Segment,
}

pub(super) async fn handler_claim(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ClaimPayload>,
) -> impl IntoResponse {
    let kind = match AchievementKind::from_slug(&payload.achievement) {
        Ok(kind) => kind,
        Err(e) => return engine_error_response(&e).into_response(),
    };
    match state
        .engine
        .orchestrator
        .claim_achievement_reward(payload.user_id, kind, payload.segment, Utc::now())
        .await
    {
        Ok(ClaimOutcome::Claimed(outcome)) => {
            state.prom_metrics.rewards_claimed_total.inc();
            Json(serde_json::json!({
                "claimed": true,
                "balance": outcome.balance,
                "leveled_up": outcome.leveled_up,
                "level": outcome.new_level,
            }))
            .into_response()
        }
        Ok(ClaimOutcome::AlreadyClaimed) => Json(serde_json::json!({
            "claimed": false,
            "already_claimed": true,
        }))
        .into_response(),
        Err(e) => engine_error_response(&e).into_response(),
    }
}

pub(super) async fn handler_user_achievements(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> impl IntoResponse {
    match state.engine.tracker.all_progress(id).await {
        Ok(progress) => Json(serde_json::json!({ "achievements": progress })).into_response(),
        Err(e) => engine_error_response(&e).into_response(),
    }
}
