//! Notification feed for the frontend, backed by the buffered sink.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;

#[derive(Deserialize)]
pub(super) struct NotificationsQuery {
    user_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

pub(super) async fn handler_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationsQuery>,
) -> impl IntoResponse {
    let notifications = match query.user_id {
        Some(user) => state.notifications.recent_for(user, query.limit),
        None => state.notifications.recent(query.limit),
    };
    Json(serde_json::json!({ "notifications": notifications }))
}
