//! CLI configuration layer: thin wrapper around `huesync_config`.
//!
//! Adds `GlobalOpts`-aware overrides on top of the profile types.

use std::time::Duration;

use secrecy::SecretString;

use huesync_config::{Config, Profile};
use huesync_core::BridgeConfig;

pub use huesync_config::{config_path, load_config_or_default, save_config};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Profile resolution ───────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Resolve the app key: `--app-key` flag first, then the profile chain.
fn resolve_app_key(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<SecretString, CliError> {
    if let Some(ref key) = global.app_key {
        return Ok(SecretString::from(key.clone()));
    }
    Ok(huesync_config::resolve_app_key(profile, profile_name)?)
}

/// Translate a profile plus global flags into a `BridgeConfig`.
pub fn resolve_profile(
    cfg: &Config,
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<BridgeConfig, CliError> {
    let app_key = resolve_app_key(profile, profile_name, global)?;
    let effective = match global.bridge {
        Some(ref url) => Profile {
            bridge: url.clone(),
            ..profile.clone()
        },
        None => profile.clone(),
    };
    let mut bridge = huesync_config::bridge_config_with_key(&effective, &cfg.defaults, app_key)?;

    if global.insecure {
        bridge.tls = huesync_config::tls_for(true, None);
    }
    if let Some(secs) = global.timeout {
        bridge.timeout = Duration::from_secs(secs);
    }
    Ok(bridge)
}

/// Build a `BridgeConfig` from the config file, profile, and CLI overrides.
pub fn build_bridge_config(global: &GlobalOpts) -> Result<BridgeConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    if let Some(profile) = cfg.profiles.get(&profile_name) {
        return resolve_profile(&cfg, profile, &profile_name, global);
    }

    // An explicitly requested profile must exist.
    if global.profile.is_some() {
        let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: if names.is_empty() {
                "(none)".into()
            } else {
                names.join(", ")
            },
        });
    }

    // No profile -- build from flags / env vars alone.
    let url_str = global.bridge.as_deref().ok_or_else(|| CliError::NoConfig {
        path: config_path().display().to_string(),
    })?;
    let url = huesync_config::parse_bridge_url(url_str)?;
    let app_key = global
        .app_key
        .clone()
        .map(SecretString::from)
        .ok_or(CliError::NoCredentials {
            profile: profile_name,
        })?;

    let mut bridge = BridgeConfig::new(url, app_key);
    bridge.tls = huesync_config::tls_for(global.insecure || cfg.defaults.insecure, None);
    bridge.timeout = Duration::from_secs(global.timeout.unwrap_or(cfg.defaults.timeout));
    Ok(bridge)
}
