//! Error types for transports and signaling

use thiserror::Error;
use tr_core::CoreError;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("peer id already in use: {0}")]
    DuplicatePeer(String),

    #[error("transport is closed")]
    Closed,

    #[error("shared transport state poisoned")]
    Poisoned,

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, NetError>;
