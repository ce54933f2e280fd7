//! Error type shared by every session component.
//!
//! Actions return these instead of swallowing failures so callers decide
//! whether to retry or alert the user. Background tasks log them and recover
//! through the reconnect loop.

/// Errors surfaced by the messaging session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A required environment variable was not set.
    #[error("missing configuration: set {var}")]
    MissingConfig { var: &'static str },
    /// The cookie store has no entry for the configured token cookie.
    #[error("no credential cookie named `{0}`")]
    MissingCredential(String),
    /// The credential cannot be sent as an HTTP header.
    #[error("credential is not a valid header value")]
    InvalidCredential,
    /// The websocket handshake failed.
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    /// The transport closed before the exchange completed.
    #[error("transport closed")]
    Closed,
    /// No transport is live.
    #[error("not connected")]
    NotConnected,
    /// No acknowledgment arrived within the configured timeout.
    #[error("timed out waiting for {event} acknowledgment")]
    Timeout { event: String },
    /// The server answered with an error acknowledgment.
    #[error("server rejected {event}: {message}")]
    Rejected { event: String, message: String },
    /// The conversation list request failed at the HTTP layer.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The conversation list endpoint returned a non-success status.
    #[error("http {status} from {url}")]
    HttpStatus { status: u16, url: String },
    /// A payload did not match its expected schema.
    #[error("invalid {event} payload: {reason}")]
    InvalidPayload { event: String, reason: String },
}

impl SessionError {
    /// Whether retrying the same action later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Closed | Self::NotConnected | Self::Timeout { .. } | Self::Http(_)
        ) || matches!(self, Self::HttpStatus { status, .. } if *status >= 500)
    }
}
