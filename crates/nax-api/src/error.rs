use thiserror::Error;

/// Top-level error type for the `nax-api` crate.
///
/// Covers every failure mode on the wire: authentication, transport,
/// plain HTTP calls, and the WebSocket stream. `nax-core` maps these into
/// connection-state changes and caller-facing results.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected (bad credentials, missing anti-forgery token, etc.)
    #[error("Login attempt failed: {message}")]
    Authentication { message: String },

    /// An operation needed a logged-in session and none is active.
    #[error("Not logged in")]
    NotLoggedIn,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("Could not connect: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS configuration or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Plain HTTP ──────────────────────────────────────────────────
    /// Non-2xx response from a GET/POST against the device tree.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket upgrade failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed while sending or receiving.
    #[error("WebSocket closed: {0}")]
    WebSocketClosed(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` for the "could not connect" category: DNS, refused,
    /// timeouts and failed upgrades.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Tls(_) | Self::WebSocketConnect(_) | Self::WebSocketClosed(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if the device rejected the credentials or token.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::NotLoggedIn)
    }
}
