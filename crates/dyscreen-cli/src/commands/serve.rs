//! The `dyscreen serve` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use dyscreen_providers::load_config_from;

pub async fn execute(
    config_path: Option<PathBuf>,
    address: Option<String>,
    in_memory: bool,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let state = dyscreen_cli::state_from_config(&config, in_memory).await?;

    if config.identities.is_empty() {
        tracing::warn!("no [[identities]] configured, every login will be rejected");
    }

    let address = address.unwrap_or_else(|| config.server.address.clone());
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!("listening on http://{address}/api/v1");
    axum::serve(listener, dyscreen_cli::http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
