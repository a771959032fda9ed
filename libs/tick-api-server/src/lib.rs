//! HTTP + WebSocket adapter over a [`tick_engine::Engine`].
//!
//! | Route                   | Purpose                               |
//! |-------------------------|---------------------------------------|
//! | `GET /ws`               | data channel + back-channel           |
//! | `GET /api/config`       | current `RateConfig`                  |
//! | `POST /api/config`      | apply a partial `RateConfig`          |
//! | `GET /api/stats`        | egress rate and subscriber stats      |
//! | `POST /api/stats/clear` | drop all subscriber stats             |
//! | `GET /health`           | liveness                              |

mod error;
mod http;
mod ws;

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;

use tick_engine::Engine;

pub use error::ApiServerError;

#[derive(Clone)]
pub(crate) struct AppState {
    engine: Engine,
}

pub fn router(engine: Engine) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/api/config", get(http::handle_get_config).post(http::handle_apply_config))
        .route("/api/stats", get(http::handle_get_stats))
        .route("/api/stats/clear", post(http::handle_clear_stats))
        .route("/health", get(http::handle_health))
        .with_state(state)
}

/// Serve on `0.0.0.0:port` until `shutdown` fires.
pub async fn run(port: u16, engine: Engine, shutdown: CancellationToken) -> Result<(), ApiServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ApiServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    serve(listener, engine, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    engine: Engine,
    shutdown: CancellationToken,
) -> Result<(), ApiServerError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "api server listening");
    }

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(ApiServerError::Serve)?;

    tracing::info!("api server stopped");
    Ok(())
}
