//! The `error` module defines the error types used within `tidings`.
//!
//! Timeouts and stale unsubscribes are ordinary outcomes and never show up
//! here. `BrokerError` is only produced when an actor task has stopped
//! running, which means the runtime is shutting down or an actor panicked.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("topic registry is no longer running")]
    HubUnavailable,

    #[error("topic '{0}' is no longer running")]
    TopicUnavailable(String),
}

/// Errors raised by the WebSocket front end.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}
