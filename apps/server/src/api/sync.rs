//! Manual refresh, engine status and liveness.

use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use rolesync_core::sync::{EngineStatus, RefreshReport};

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

async fn trigger_refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<RefreshReport>> {
    if !state.webhook_auth.verify(&headers) {
        warn!("rejected manual refresh with missing or invalid secret");
        return Err(ApiError::Unauthorized("Invalid webhook secret".to_string()));
    }

    info!("manual refresh requested");
    let report = state.engine.refresh().await?;
    Ok(Json(report))
}

async fn get_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<EngineStatus>> {
    Ok(Json(state.engine.status().await?))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync/refresh", post(trigger_refresh))
        .route("/sync/status", get(get_status))
        .route("/health", get(health))
}
