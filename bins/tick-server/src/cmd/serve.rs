use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tick_engine::Engine;

use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;

/// How long open connections get to close after Ctrl+C.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("tick-server starting");

    // --- Load config ---
    let config = match &args.config {
        Some(path) => {
            let cfg = ServerConfig::load(path)?;
            tracing::info!(config = %path, "loaded config");
            cfg
        }
        None => {
            tracing::info!("no config file given, using defaults");
            ServerConfig::default()
        }
    };
    let config = config.with_overrides(&args)?;

    if config.engine.unique_timestamps {
        tracing::warn!("unique_timestamps enabled: encoding cache off, every message carries its own event");
    }

    // --- Engine ---
    let engine = Engine::start(config.engine.settings());

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- API server (HTTP + WS) ---
    let api_port = config.api_port;
    let mut api_handle = tokio::spawn(tick_api_server::run(api_port, engine.clone(), token.clone()));

    tracing::info!(port = api_port, "server ready");

    // --- Wait for Ctrl+C or an early API exit ---
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("shutting down...");
        }
        res = &mut api_handle => {
            engine.shutdown();
            res??;
            return Ok(());
        }
    }

    // Stop pacing first so open sockets stop receiving, then let them drain.
    engine.shutdown();
    token.cancel();

    match tokio::time::timeout(DRAIN_TIMEOUT, &mut api_handle).await {
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "api server error"),
        Ok(Err(e)) => tracing::error!(error = %e, "api task failed"),
        Ok(Ok(Ok(()))) => {}
        Err(_) => {
            tracing::warn!("api server did not stop in time, aborting");
            api_handle.abort();
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}
