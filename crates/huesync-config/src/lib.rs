//! Configuration profiles for huesync.
//!
//! TOML profiles layered with `HUESYNC_` environment variables,
//! application-key resolution (env + keyring + plaintext), and
//! translation to `huesync_core::BridgeConfig`. The binary adds
//! flag-aware wrappers on top.

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

use huesync_core::{BridgeConfig, TlsVerification};

const KEYRING_SERVICE: &str = "huesync";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no app key configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

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
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named bridge profiles.
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
    /// Look a profile up by name.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_event_stream() -> bool {
    true
}
fn default_retry_interval() -> u64 {
    10
}

/// A named bridge profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Bridge base URL (e.g., "https://192.168.1.20").
    pub bridge: String,

    /// Application key in plaintext. Prefer the keyring or an env var.
    pub app_key: Option<String>,

    /// Name of an environment variable holding the application key.
    pub app_key_env: Option<String>,

    /// Path to a CA certificate for strict TLS verification.
    pub ca_cert: Option<PathBuf>,

    pub insecure: Option<bool>,

    /// Request timeout override, in seconds.
    pub timeout: Option<u64>,

    #[serde(default = "default_event_stream")]
    pub event_stream: bool,

    /// Slow event-stream reconnect interval, in seconds.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,

    /// Model id → vendor product number, used for device icons.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub product_numbers: HashMap<String, String>,
}

impl Profile {
    pub fn new(bridge: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            event_stream: default_event_stream(),
            retry_interval: default_retry_interval(),
            ..Self::default()
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "huesync", "huesync").map_or_else(
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
    p.push("huesync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from an explicit file path, still layering the
/// environment on top. A missing file yields the defaults.
///
/// Nested keys use a double underscore, e.g.
/// `HUESYNC_DEFAULTS__TIMEOUT=30`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HUESYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to the canonical path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── App key resolution (without CLI flags) ──────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/app-key"))
}

/// Resolve the application key from the credential chain.
pub fn resolve_app_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's app_key_env → env var lookup
    if let Some(ref env_name) = profile.app_key_env {
        if let Ok(val) = std::env::var(env_name) {
            if !val.is_empty() {
                return Ok(SecretString::from(val));
            }
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref key) = profile.app_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store an application key in the system keyring for `profile_name`.
pub fn store_app_key(profile_name: &str, app_key: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(app_key)?;
    Ok(())
}

// ── Translation to the runtime config ───────────────────────────────

/// Parse and check a bridge URL.
pub fn parse_bridge_url(raw: &str) -> Result<url::Url, ConfigError> {
    let url: url::Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: "bridge".into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "bridge".into(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

/// Choose the TLS strategy for a profile. Bridges ship self-signed
/// certificates, so only an explicit CA switches to strict checking.
pub fn tls_for(insecure: bool, ca_cert: Option<&Path>) -> TlsVerification {
    match ca_cert {
        Some(path) if !insecure => TlsVerification::CustomCa(path.to_path_buf()),
        _ => TlsVerification::DangerAcceptInvalid,
    }
}

/// Build a `BridgeConfig` from a profile, with no CLI flag overrides.
pub fn profile_to_bridge_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<BridgeConfig, ConfigError> {
    let app_key = resolve_app_key(profile, profile_name)?;
    bridge_config_with_key(profile, defaults, app_key)
}

/// Build a `BridgeConfig` from a profile using an already resolved key.
pub fn bridge_config_with_key(
    profile: &Profile,
    defaults: &Defaults,
    app_key: SecretString,
) -> Result<BridgeConfig, ConfigError> {
    let url = parse_bridge_url(&profile.bridge)?;

    let mut config = BridgeConfig::new(url, app_key);
    config.tls = tls_for(
        profile.insecure.unwrap_or(defaults.insecure),
        profile.ca_cert.as_deref(),
    );
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.event_stream_enabled = profile.event_stream;
    config.retry_interval = Duration::from_secs(profile.retry_interval.max(1));
    config
        .model_id_to_product_number
        .clone_from(&profile.product_numbers);
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
timeout = 5

[profiles.home]
bridge = "https://192.168.1.20"
app_key = "plain-key"
retry_interval = 0

[profiles.home.product_numbers]
LCA001 = "9290022166"

[profiles.office]
bridge = "https://10.0.0.2"
insecure = false
ca_cert = "/etc/hue/ca.pem"
"#;

    fn write_sample() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_profiles_from_file() {
        let (_dir, path) = write_sample();
        let cfg = load_config_from(&path).unwrap();

        assert_eq!(cfg.default_profile.as_deref(), Some("home"));
        assert_eq!(cfg.defaults.timeout, 5);
        assert_eq!(cfg.defaults.output, "table");
        let home = cfg.profile("home").unwrap();
        assert_eq!(home.bridge, "https://192.168.1.20");
        assert!(home.event_stream);
        assert_eq!(
            home.product_numbers.get("LCA001").map(String::as_str),
            Some("9290022166")
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn save_then_load_keeps_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        let mut profile = Profile::new("https://bridge.local");
        profile.app_key_env = Some("HUE_KEY".into());
        cfg.profiles.insert("default".into(), profile.clone());
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profile("default").unwrap(), &profile);
    }

    #[test]
    fn unknown_profile_is_reported() {
        let cfg = Config::default();
        assert!(matches!(
            cfg.profile("nope"),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn app_key_env_takes_precedence_over_plaintext() {
        let mut profile = Profile::new("https://bridge.local");
        // Cargo sets this for every test process.
        profile.app_key_env = Some("CARGO_PKG_NAME".into());
        profile.app_key = Some("plain".into());
        let key = resolve_app_key(&profile, "env-precedence-test").unwrap();
        assert_eq!(key.expose_secret(), "huesync-config");
    }

    #[test]
    fn bridge_config_applies_profile_values() {
        let (_dir, path) = write_sample();
        let cfg = load_config_from(&path).unwrap();
        let bridge =
            profile_to_bridge_config(cfg.profile("home").unwrap(), "home", &cfg.defaults)
                .unwrap();

        assert_eq!(bridge.url.as_str(), "https://192.168.1.20/");
        assert_eq!(bridge.timeout, Duration::from_secs(5));
        assert_eq!(bridge.retry_interval, Duration::from_secs(1));
        assert_eq!(bridge.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(bridge.model_id_to_product_number.len(), 1);
    }

    #[test]
    fn ca_cert_selects_strict_tls_unless_insecure() {
        let ca = Path::new("/etc/hue/ca.pem");
        assert_eq!(
            tls_for(false, Some(ca)),
            TlsVerification::CustomCa(ca.to_path_buf())
        );
        assert_eq!(tls_for(true, Some(ca)), TlsVerification::DangerAcceptInvalid);
        assert_eq!(tls_for(false, None), TlsVerification::DangerAcceptInvalid);
    }

    #[test]
    fn rejects_non_http_bridge_urls() {
        assert!(parse_bridge_url("https://192.168.1.20").is_ok());
        assert!(matches!(
            parse_bridge_url("ftp://bridge"),
            Err(ConfigError::Validation { .. })
        ));
        assert!(matches!(
            parse_bridge_url("not a url"),
            Err(ConfigError::Validation { .. })
        ));
    }
}
