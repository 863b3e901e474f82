//! Client error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Origin has unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Client task is gone")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
