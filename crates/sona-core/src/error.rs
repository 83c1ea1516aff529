//! Error types for the appliance core
//!
//! No error propagates past the session loop; the process is expected to run
//! indefinitely. These kinds exist so pipelines can log, count and route
//! failures, not so callers can crash on them.

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The transport could not be opened; surfaced to the user as an alert.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A send failed; stop draining the send queue for this tick.
    #[error("transport transient failure: {0}")]
    TransportTransient(String),

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("encode failure: {0}")]
    EncodeFailure(String),

    /// A bounded queue rejected an element; counted, never surfaced.
    #[error("queue overflow: {0}")]
    QueueOverflow(&'static str),

    /// Malformed JSON or an unknown message type; logged and ignored.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("upgrade error: {0}")]
    Upgrade(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::QueueOverflow("outbound_send");
        assert_eq!(err.to_string(), "queue overflow: outbound_send");

        let err = Error::TransportTransient("publish queue full".into());
        assert!(err.to_string().contains("publish queue full"));
    }
}
