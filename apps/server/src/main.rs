//! Role sync server: keeps community roles in step with the membership table.

mod api;
mod config;
mod error;
mod main_lib;
mod scheduler;
#[cfg(test)]
mod test_support;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::main_lib::{app, build_state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Library crates log through `log`; the fmt subscriber picks those records up too.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,rolesync_core=debug,rolesync_server=debug")
            }),
        )
        .init();

    let config = ServerConfig::from_env().context("configuration error")?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        table_id = config.table_id,
        guild_id = %config.bindings.guild_id,
        refresh_interval_secs = config.refresh_interval_secs,
        "starting role sync server"
    );

    let state = build_state(&config)?;
    scheduler::spawn_refresh_loop(state.engine.clone(), config.refresh_interval_secs);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(listen_addr = %config.listen_addr, "role sync server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("role sync server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
