//! CLI-specific configuration: layers `GlobalOpts` flag overrides on top
//! of the shared `nax-config` profiles.

use secrecy::SecretString;

use nax_config::{Config, Profile};
use nax_core::ClientConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Determine the active profile name: `--profile`, then `default_profile`,
/// then `"default"`.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build a `ClientConfig` from the config file, profile, and CLI overrides.
pub fn build_client_config(global: &GlobalOpts) -> Result<ClientConfig, CliError> {
    let cfg = nax_config::load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut profile = match (cfg.profiles.get(&profile_name), &global.host) {
        (Some(profile), _) => profile.clone(),
        (None, Some(_)) => Profile::default(),
        (None, None) => {
            return Err(CliError::NoConfig {
                path: nax_config::config_path().display().to_string(),
            });
        }
    };
    apply_overrides(&mut profile, global);

    let (username, password) = match global.password {
        Some(ref password) => {
            let username = profile
                .username
                .clone()
                .ok_or_else(|| CliError::NoCredentials {
                    profile: profile_name.clone(),
                })?;
            (username, SecretString::from(password.clone()))
        }
        None => nax_config::resolve_credentials(&profile, &profile_name)?,
    };

    Ok(nax_config::profile_to_client_config(
        &profile,
        &cfg.defaults,
        username,
        password,
    )?)
}

fn apply_overrides(profile: &mut Profile, global: &GlobalOpts) {
    if let Some(ref host) = global.host {
        profile.host.clone_from(host);
    }
    if let Some(ref username) = global.username {
        profile.username = Some(username.clone());
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }
    if global.no_http_fallback {
        profile.http_fallback = Some(false);
    }
}
