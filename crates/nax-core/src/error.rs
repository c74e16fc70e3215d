// ── Core error types ──
//
// User-facing errors from nax-core. Consumers never match on reqwest
// or tungstenite errors directly; `From<nax_api::Error>` folds the
// transport layer into these variants.

use thiserror::Error;

use crate::path::PathError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to device at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Connection to device timed out")]
    Timeout,

    /// No live stream, and HTTP fallback is disabled or has no session.
    #[error("Not connected: no stream and no HTTP fallback available")]
    NotConnected,

    /// The session was torn down while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Invalid path: {0}")]
    InvalidPath(#[from] PathError),

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The "could not connect" category, as opposed to rejected
    /// credentials or bad input.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout | Self::ConnectionClosed
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<nax_api::Error> for CoreError {
    fn from(err: nax_api::Error) -> Self {
        match err {
            nax_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            nax_api::Error::NotLoggedIn => CoreError::NotLoggedIn,
            nax_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() || e.is_request() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: err.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: err.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            nax_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },
            nax_api::Error::Tls(reason) => CoreError::ConnectionFailed {
                url: "<tls>".into(),
                reason,
            },
            nax_api::Error::Http { status, url, body } => CoreError::Api {
                message: format!("{url} returned HTTP {status}: {body}"),
                status: Some(status),
            },
            nax_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: "<websocket>".into(),
                reason,
            },
            nax_api::Error::WebSocketClosed(_) => CoreError::ConnectionClosed,
            nax_api::Error::Serialization(e) => CoreError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_auth_maps_to_authentication_failed() {
        let err: CoreError = nax_api::Error::Authentication {
            message: "HTTP 403".into(),
        }
        .into();
        assert!(matches!(err, CoreError::AuthenticationFailed { ref message } if message == "HTTP 403"));
        assert!(!err.is_connectivity());
    }

    #[test]
    fn websocket_failures_are_connectivity() {
        let err: CoreError = nax_api::Error::WebSocketConnect("refused".into()).into();
        assert!(err.is_connectivity());

        let err: CoreError = nax_api::Error::WebSocketClosed("reset".into()).into();
        assert!(matches!(err, CoreError::ConnectionClosed));
    }

    #[test]
    fn http_status_is_preserved() {
        let err: CoreError = nax_api::Error::Http {
            status: 404,
            url: "https://nax/Device/Nope".into(),
            body: String::new(),
        }
        .into();
        assert!(matches!(err, CoreError::Api { status: Some(404), .. }));
    }
}
