#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    #[error("bind api {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("axum serve: {0}")]
    Serve(#[source] std::io::Error),
}
