//! Push notifications from the table service.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use rolesync_core::sync::RawRowNotification;

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAccepted {
    pub status: &'static str,
    pub batch_id: Uuid,
}

/// Acknowledges as soon as the notification is queued; role sync runs on the engine task.
async fn receive_row_notification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<WebhookAccepted>)> {
    if !state.webhook_auth.verify(&headers) {
        warn!(
            header = state.webhook_auth.header(),
            "rejected row notification with missing or invalid secret"
        );
        return Err(ApiError::Unauthorized("Invalid webhook secret".to_string()));
    }

    let raw: RawRowNotification = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Malformed row notification: {}", e)))?;
    let notification = raw
        .project(&state.projection)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let event_type = notification.event_type();
    let items = notification.len();
    let batch_id = state.engine.notify(notification)?;
    info!(%batch_id, %event_type, items, "row notification accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAccepted {
            status: "accepted",
            batch_id,
        }),
    ))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/rows", post(receive_row_notification))
}
