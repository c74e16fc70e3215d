// ── Runtime connection configuration ──
//
// Describes how to reach one device. Carries credentials and tuning but
// never touches disk; nax-config or an embedding application builds a
// `ClientConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use nax_api::{TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

/// Pause between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
/// Interval between stream pings while connected.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Bundled web PKI roots (strict).
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification. Devices ship a self-signed certificate.
    #[default]
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        }
    }
}

/// Reconnection policy for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Fixed pause after each failed attempt. The first attempt after a
    /// drop is immediate.
    pub interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Configuration for one device connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device root URL, e.g. `https://192.168.1.58`.
    pub url: Url,
    /// Stream URL override. Derived from `url` when unset.
    pub stream_url: Option<Url>,
    pub username: String,
    pub password: SecretString,
    pub tls: TlsVerification,
    /// HTTP request and connect timeout.
    pub timeout: Duration,
    /// Serve `get` misses and disconnected `put`s over plain HTTP.
    pub http_fallback: bool,
    pub reconnect: ReconnectConfig,
    /// Stream ping interval. `None` disables pings.
    pub keepalive: Option<Duration>,
}

impl ClientConfig {
    /// Config with defaults for everything but the target and credentials.
    pub fn new(url: Url, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            url,
            stream_url: None,
            username: username.into(),
            password,
            tls: TlsVerification::default(),
            timeout: nax_api::transport::DEFAULT_TIMEOUT,
            http_fallback: true,
            reconnect: ReconnectConfig::default(),
            keepalive: Some(DEFAULT_KEEPALIVE_INTERVAL),
        }
    }

    /// Build a `ClientConfig` from a bare host (`192.168.1.58`) or URL.
    pub fn for_host(
        host: &str,
        username: impl Into<String>,
        password: SecretString,
    ) -> Result<Self, url::ParseError> {
        let url = if host.contains("://") {
            Url::parse(host)?
        } else {
            Url::parse(&format!("https://{host}"))?
        };
        Ok(Self::new(url, username, password))
    }

    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: TlsMode::from(&self.tls),
            timeout: self.timeout,
            cookie_jar: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_https() {
        let config = ClientConfig::for_host("192.168.1.58", "admin", SecretString::from("pw".to_owned())).unwrap();
        assert_eq!(config.url.as_str(), "https://192.168.1.58/");
        assert!(config.http_fallback);
        assert_eq!(config.reconnect.interval, Duration::from_secs(3));
    }

    #[test]
    fn explicit_scheme_is_kept() {
        let config =
            ClientConfig::for_host("http://127.0.0.1:8080", "admin", SecretString::from("pw".to_owned())).unwrap();
        assert_eq!(config.url.as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn tls_maps_to_transport_mode() {
        let mut config = ClientConfig::for_host("nax", "admin", SecretString::from("pw".to_owned())).unwrap();
        config.tls = TlsVerification::SystemDefaults;
        assert_eq!(config.transport().tls, TlsMode::System);
    }
}
