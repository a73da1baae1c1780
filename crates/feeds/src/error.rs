//! Error types for feed operations.

use ingest_core::{Exchange, UnknownExchange};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during feed operations.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionOpenFailed(String),

    #[error("WebSocket closed: {0}")]
    ConnectionClosed(String),

    #[error("Failed to send frame: {0}")]
    Send(String),

    #[error("Failed to decode frame: {0}")]
    Decode(String),

    #[error("Ran out of reconnection attempts after {attempts} tries")]
    RetriesExhausted { attempts: u32 },

    #[error("Unexpected unsubscribe acknowledgment: {0}")]
    UnsubscribeAckMismatch(String),

    #[error("Queue push blocked for longer than {0:?}")]
    ProducerStalled(Duration),

    #[error("Ingest queue closed")]
    QueueClosed,

    #[error("Exchange not supported: {0}")]
    UnsupportedExchange(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Session already running: {exchange} {symbol}")]
    SessionExists { exchange: Exchange, symbol: String },

    #[error("No session for {exchange} {symbol}")]
    SessionNotFound { exchange: Exchange, symbol: String },
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Decode(err.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(err: url::ParseError) -> Self {
        FeedError::InvalidEndpoint(err.to_string())
    }
}

impl From<UnknownExchange> for FeedError {
    fn from(err: UnknownExchange) -> Self {
        FeedError::UnsupportedExchange(err.0)
    }
}

impl FeedError {
    /// Returns true if a session should spend one retry on this error and
    /// reconnect. Everything else ends the session.
    pub fn counts_toward_retry(&self) -> bool {
        matches!(
            self,
            FeedError::ConnectionOpenFailed(_)
                | FeedError::ConnectionClosed(_)
                | FeedError::Send(_)
                | FeedError::ProducerStalled(_)
        )
    }
}
