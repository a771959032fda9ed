#[derive(Debug, thiserror::Error)]
pub enum SubError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
