use std::time::Duration;
use thiserror::Error;

use tidebook_core::{CoreError, VenueId};

use crate::adapter::OrderFlag;

/// Failures at the venue boundary: transports, signing, and venue business
/// responses.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not decode venue payload: {0}")]
    Decode(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("venue rejected request ({code}): {text}")]
    VenueRejected { code: String, text: String },

    #[error("flag {flag:?} is not supported by {venue}")]
    UnsupportedFlag { flag: OrderFlag, venue: VenueId },

    #[error("order is not active at the venue")]
    NotActive,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("no data received within {0:?}")]
    Idle(std::time::Duration),

    #[error("channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl TransportError {
    /// Fatal errors stop the worker; with reconnection enabled it
    /// re-initializes from scratch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Auth(_) | TransportError::ProtocolViolation(_)
        )
    }

    /// Retryable errors are retried locally (with backoff for rate limits)
    /// and never surfaced as events.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Ws(_)
                | TransportError::Http(_)
                | TransportError::RateLimited { .. }
                | TransportError::ConnectionClosed(_)
                | TransportError::Idle(_)
        )
    }
}
