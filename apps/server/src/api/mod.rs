//! HTTP routes.

mod sync;
mod webhook;

use std::sync::Arc;

use axum::Router;

use crate::main_lib::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().merge(webhook::router()).merge(sync::router())
}
