use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{http::HeaderMap, Router};
use sha2::{Digest, Sha256};

use rolesync_core::sync::{
    EventDispatcher, ReconcileEngine, ReconcileHandle, RoleSynchronizer, RowProjection,
};
use rolesync_guild_client::{GuildClient, GuildClientConfig};
use rolesync_table_client::{TableClient, TableClientConfig};

use crate::config::ServerConfig;

/// Checks the shared secret header by comparing SHA-256 digests.
pub struct WebhookAuth {
    header: String,
    digest: Vec<u8>,
}

impl WebhookAuth {
    pub fn new(header: impl Into<String>, secret: &str) -> Self {
        Self {
            header: header.into(),
            digest: Sha256::digest(secret.as_bytes()).to_vec(),
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn verify(&self, headers: &HeaderMap) -> bool {
        let Some(provided) = headers
            .get(self.header.as_str())
            .and_then(|value| value.to_str().ok())
        else {
            return false;
        };
        let provided = Sha256::digest(provided.as_bytes());
        provided.len() == self.digest.len()
            && provided
                .iter()
                .zip(self.digest.iter())
                .fold(0_u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

pub struct AppState {
    pub engine: ReconcileHandle,
    pub projection: RowProjection,
    pub webhook_auth: WebhookAuth,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: ReconcileHandle, projection: RowProjection, webhook_auth: WebhookAuth) -> Self {
        Self {
            engine,
            projection,
            webhook_auth,
            started_at: Instant::now(),
        }
    }
}

/// Wires the HTTP collaborators into a running reconciliation engine.
pub fn build_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let table = TableClient::new(TableClientConfig {
        base_url: config.table_api_url.clone(),
        token: config.table_api_token.clone(),
        table_id: config.table_id,
        page_size: config.table_page_size,
        projection: config.projection.clone(),
    })
    .context("failed to build table client")?;

    let guild = GuildClient::new(GuildClientConfig {
        base_url: config.guild_api_url.clone(),
        bot_token: config.guild_bot_token.clone(),
    })
    .context("failed to build guild client")?;

    let roles = Arc::new(RoleSynchronizer::new(
        Arc::new(guild),
        config.bindings.clone(),
    ));
    let engine = ReconcileEngine::new(Arc::new(table), EventDispatcher::new(roles)).spawn();

    Ok(Arc::new(AppState::new(
        engine,
        config.projection.clone(),
        WebhookAuth::new(config.webhook_secret_header.clone(), &config.webhook_secret),
    )))
}

pub fn app(state: Arc<AppState>) -> Router {
    crate::api::router().with_state(state)
}
