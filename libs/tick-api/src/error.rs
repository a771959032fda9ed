/// Failure to turn a data-channel frame back into an [`Event`](crate::Event).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("binary frame must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("unknown key index {0}")]
    UnknownKey(u32),

    #[error("text frame: {0}")]
    Text(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Text(e.to_string())
    }
}
