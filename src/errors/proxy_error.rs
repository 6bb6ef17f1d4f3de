use std::time::Duration;

use thiserror::Error;

/// Errors produced while framing or parsing events.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid event header: {0}")]
    InvalidHeader(String),

    #[error("Invalid data for event '{kind}': {reason}")]
    InvalidData { kind: String, reason: String },

    #[error("Event header exceeds {limit} bytes")]
    HeaderTooLong { limit: usize },

    #[error("Event data block of {len} bytes exceeds {limit} bytes")]
    DataTooLong { len: usize, limit: usize },

    #[error("Event payload of {len} bytes exceeds {limit} bytes")]
    PayloadTooLong { len: usize, limit: usize },

    #[error("Stream ended in the middle of an event")]
    Truncated,
}

impl ProtocolError {
    pub fn invalid_data(kind: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidData {
            kind: kind.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure of a single upstream candidate.
///
/// Every variant is recoverable by advancing to the next candidate.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Failed to connect to {uri}: {source}")]
    Connect {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Upstream closed the connection before a terminal event")]
    Closed,

    #[error("Unexpected response from upstream: {0}")]
    UnexpectedResponse(String),
}

/// Write failure toward the client; the connection cannot continue.
#[derive(Debug, Error)]
#[error("Failed to write event to client: {0}")]
pub struct SinkError(#[from] pub ProtocolError);

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        Self(ProtocolError::Io(err))
    }
}

/// Cache I/O failures. These are logged and never reach the client.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),
}
