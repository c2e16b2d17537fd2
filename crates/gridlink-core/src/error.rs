//! Shared error type across gridlink crates.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::envelope::ErrorObject;

/// Stable error categories (used in logs and by callers that branch on kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport-level connect failure.
    Connection,
    /// Operation attempted outside the `Connected` state.
    NotConnected,
    /// A single inbound frame failed to parse or validate.
    MalformedMessage,
    /// Inbound peer-initiated request.
    UnsupportedMessage,
    /// Caller reused an in-flight request id.
    DuplicateRequestId,
    /// Outbound envelope could not be encoded.
    Serialization,
    /// Per-request deadline exceeded.
    Timeout,
    /// Connection went away while requests were pending.
    ConnectionClosed,
    /// The peer answered with an error object.
    Remote,
    /// Invalid configuration.
    Config,
    /// Write to the socket failed.
    Io,
}

impl ErrorKind {
    /// String representation used in logs and test assertions.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "CONNECTION_ERROR",
            ErrorKind::NotConnected => "NOT_CONNECTED",
            ErrorKind::MalformedMessage => "MALFORMED_MESSAGE",
            ErrorKind::UnsupportedMessage => "UNSUPPORTED_MESSAGE",
            ErrorKind::DuplicateRequestId => "DUPLICATE_REQUEST_ID",
            ErrorKind::Serialization => "SERIALIZATION_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorKind::Remote => "REMOTE_ERROR",
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::Io => "IO_ERROR",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Unified error type used by core and client.
///
/// `Clone` so one disconnect can resolve every pending request with the same cause.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("failed to connect to {path}: {source}")]
    Connection {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("not connected (session is {state})")]
    NotConnected { state: &'static str },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unsupported message: {0}")]
    UnsupportedMessage(String),
    #[error("duplicate request id: {0}")]
    DuplicateRequestId(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("request {id} timed out after {after:?}")]
    Timeout { id: String, after: Duration },
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(ErrorObject),
    #[error("config: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl LinkError {
    /// Map to a stable error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::Connection { .. } => ErrorKind::Connection,
            LinkError::NotConnected { .. } => ErrorKind::NotConnected,
            LinkError::MalformedMessage(_) => ErrorKind::MalformedMessage,
            LinkError::UnsupportedMessage(_) => ErrorKind::UnsupportedMessage,
            LinkError::DuplicateRequestId(_) => ErrorKind::DuplicateRequestId,
            LinkError::Serialization(_) => ErrorKind::Serialization,
            LinkError::Timeout { .. } => ErrorKind::Timeout,
            LinkError::ConnectionClosed(_) => ErrorKind::ConnectionClosed,
            LinkError::Remote(_) => ErrorKind::Remote,
            LinkError::Config(_) => ErrorKind::Config,
            LinkError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn connection(path: impl Into<String>, source: std::io::Error) -> Self {
        LinkError::Connection {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn io(source: std::io::Error) -> Self {
        LinkError::Io(Arc::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let e = LinkError::DuplicateRequestId("r1".into());
        assert_eq!(e.kind().as_str(), "DUPLICATE_REQUEST_ID");

        let e = LinkError::connection(
            "/tmp/nope.sock",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(e.kind(), ErrorKind::Connection);
        assert!(e.to_string().contains("/tmp/nope.sock"));
    }

    #[test]
    fn clones_share_io_cause() {
        let e = LinkError::io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"));
        let c = e.clone();
        assert_eq!(c.kind(), ErrorKind::Io);
        assert_eq!(e.to_string(), c.to_string());
    }
}
