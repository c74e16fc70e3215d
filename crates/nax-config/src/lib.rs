//! Shared configuration for the nax tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `nax_core::ClientConfig`. The CLI layers its
//! `GlobalOpts` overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use nax_core::{ClientConfig, ReconnectConfig, TlsVerification};

/// Keyring service name for stored passwords.
pub const KEYRING_SERVICE: &str = "nax";
/// Environment variable consulted for the password when a profile names none.
pub const PASSWORD_ENV: &str = "NAX_PASSWORD";
/// Environment variable consulted for the username when a profile has none.
pub const USERNAME_ENV: &str = "NAX_USERNAME";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named device profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile by name, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name.to_owned(), profile))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// Devices ship self-signed certificates, so verification is off
    /// unless a profile says otherwise.
    #[serde(default = "default_insecure")]
    pub insecure: bool,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_http_fallback")]
    pub http_fallback: bool,

    /// Seconds between reconnect attempts.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            insecure: default_insecure(),
            timeout: default_timeout(),
            http_fallback: default_http_fallback(),
            reconnect_interval: default_reconnect_interval(),
        }
    }
}

fn default_output() -> String {
    "json".into()
}
fn default_insecure() -> bool {
    true
}
fn default_timeout() -> u64 {
    5
}
fn default_http_fallback() -> bool {
    true
}
fn default_reconnect_interval() -> u64 {
    3
}

/// A named device profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Device host or base URL (e.g., "192.168.1.58" or "https://nax.local").
    pub host: String,

    /// Login name.
    pub username: Option<String>,

    /// Password (plaintext, prefer keyring).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,

    /// Override HTTP fallback.
    pub http_fallback: Option<bool>,

    /// Override reconnect interval.
    pub reconnect_interval: Option<u64>,

    /// Stream URL override, for devices behind a proxy.
    pub stream_url: Option<String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "nax", "nax").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("nax");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. `NAX_`-prefixed variables override the
/// file; nested keys use a double underscore (`NAX_DEFAULTS__TIMEOUT`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NAX_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
}

/// Store a profile's password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(password)?;
    Ok(())
}

/// Resolve login credentials without CLI flags.
///
/// Username: profile, then `NAX_USERNAME`. Password: the profile's
/// `password_env` variable, then `NAX_PASSWORD`, then the keyring, then
/// plaintext in the profile.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<(String, SecretString), ConfigError> {
    resolve_credentials_with(
        profile,
        profile_name,
        |name| std::env::var(name).ok(),
        |name| keyring_entry(name).ok()?.get_password().ok(),
    )
}

fn resolve_credentials_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<(String, SecretString), ConfigError> {
    let no_credentials = || ConfigError::NoCredentials {
        profile: profile_name.into(),
    };

    let username = profile
        .username
        .clone()
        .or_else(|| env(USERNAME_ENV))
        .ok_or_else(no_credentials)?;

    // 1. Profile's password_env
    if let Some(pw) = profile.password_env.as_deref().and_then(&env) {
        return Ok((username, SecretString::from(pw)));
    }

    // 2. Global env var
    if let Some(pw) = env(PASSWORD_ENV) {
        return Ok((username, SecretString::from(pw)));
    }

    // 3. Keyring
    if let Some(pw) = keyring(profile_name) {
        return Ok((username, SecretString::from(pw)));
    }

    // 4. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok((username, SecretString::from(pw.clone())));
    }

    Err(no_credentials())
}

// ── Translation to ClientConfig ─────────────────────────────────────

/// Build a `ClientConfig` from a profile and credentials. Profile fields
/// override `defaults`.
pub fn profile_to_client_config(
    profile: &Profile,
    defaults: &Defaults,
    username: String,
    password: SecretString,
) -> Result<ClientConfig, ConfigError> {
    let mut config =
        ClientConfig::for_host(&profile.host, username, password).map_err(|e| {
            ConfigError::Validation {
                field: "host".into(),
                reason: format!("invalid host '{}': {e}", profile.host),
            }
        })?;

    config.tls = match (
        &profile.ca_cert,
        profile.insecure.unwrap_or(defaults.insecure),
    ) {
        (_, true) => TlsVerification::DangerAcceptInvalid,
        (Some(ca_path), false) => TlsVerification::CustomCa(ca_path.clone()),
        (None, false) => TlsVerification::SystemDefaults,
    };
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.http_fallback = profile.http_fallback.unwrap_or(defaults.http_fallback);
    config.reconnect = ReconnectConfig {
        interval: Duration::from_secs(
            profile
                .reconnect_interval
                .unwrap_or(defaults.reconnect_interval),
        ),
    };
    if let Some(ref raw) = profile.stream_url {
        config.stream_url = Some(raw.parse().map_err(|e| ConfigError::Validation {
            field: "stream_url".into(),
            reason: format!("invalid URL '{raw}': {e}"),
        })?);
    }
    Ok(config)
}

/// Resolve credentials and build a `ClientConfig` in one step.
pub fn resolve_client_config(
    config: &Config,
    profile_name: Option<&str>,
) -> Result<ClientConfig, ConfigError> {
    let (name, profile) = config.profile(profile_name)?;
    let (username, password) = resolve_credentials(profile, &name)?;
    profile_to_client_config(profile, &config.defaults, username, password)
}
