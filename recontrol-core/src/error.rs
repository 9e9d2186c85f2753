//! Domain-specific error types for the recontrol agent.
//!
//! All fallible operations return `Result<T, ReconError>`.
//! Nothing in this crate is fatal to the process: the worst outcome is
//! "stay disconnected" or "stop streaming", both recoverable by retrying
//! the corresponding `connect`/`start` call.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the recontrol core.
#[derive(Debug, Error)]
pub enum ReconError {
    // ── Credential Errors ────────────────────────────────────────
    /// No access token is available and none could be obtained.
    #[error("no credentials available")]
    NoCredentials,

    /// The server rejected the refresh exchange.
    #[error("token refresh rejected: {0}")]
    RefreshRejected(String),

    // ── Transport Errors ─────────────────────────────────────────
    /// Tried to send on a socket that is closed or was never opened.
    #[error("not connected")]
    NotConnected,

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The HTTP layer (token refresh) reported an error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The connection URI could not be built.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Protocol Errors ──────────────────────────────────────────
    /// Encoding or decoding of a JSON body failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A command name did not match any registered handler.
    #[error("Command type '{0}' is not supported.")]
    UnsupportedCommand(String),

    /// The command payload did not match the handler's expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A connection state transition was attempted out of order.
    #[error("invalid state transition: {0}")]
    InvalidTransition(&'static str),

    // ── Capture / Encode Errors ──────────────────────────────────
    /// Surface capture failed for one tick.
    #[error("capture failed: {0}")]
    Capture(String),

    /// Region encoding failed for one tick.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for ReconError {
    fn from(s: String) -> Self {
        ReconError::Other(s)
    }
}

impl From<&str> for ReconError {
    fn from(s: &str) -> Self {
        ReconError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ReconError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ReconError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = ReconError::NoCredentials;
        assert!(e.to_string().contains("credentials"));

        let e = ReconError::UnsupportedCommand("terminal.unknown".into());
        assert_eq!(
            e.to_string(),
            "Command type 'terminal.unknown' is not supported."
        );
    }

    #[test]
    fn from_string() {
        let e: ReconError = "something broke".into();
        assert!(matches!(e, ReconError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: ReconError = io_err.into();
        assert!(matches!(e, ReconError::Connection(_)));
    }
}
