//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
///
/// Nothing here is fatal to the process: a failed delivery degrades to a
/// missed realtime update, recovered by the application's normal refetch
/// paths.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection's writer task is gone; the socket is closing.
    #[error("Connection channel closed")]
    ChannelSend,
}

impl From<tokio::sync::mpsc::error::SendError<axum::extract::ws::Message>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::SendError<axum::extract::ws::Message>) -> Self {
        GatewayError::ChannelSend
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
