//! Shared helpers for command handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use huesync_core::{BridgeConfig, Controller, CoreError, DeviceEntry, Scene};

use crate::error::CliError;

/// Upper bound for one connect → full sync → act → disconnect run.
pub fn sync_deadline(config: &BridgeConfig) -> Duration {
    config.timeout * 3 + Duration::from_secs(10)
}

/// Run `f` against a controller that has completed its first full sync.
pub async fn with_synced<F, Fut, T>(config: BridgeConfig, f: F) -> Result<T, CliError>
where
    F: FnOnce(Controller) -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let deadline = sync_deadline(&config);
    tokio::time::timeout(deadline, Controller::oneshot(config, f))
        .await
        .map_err(|_| CliError::Timeout {
            seconds: deadline.as_secs(),
        })?
        .map_err(CliError::from)
}

/// Resolve a device by id or case-insensitive name.
pub fn resolve_device(controller: &Controller, identifier: &str) -> Result<Arc<DeviceEntry>, CoreError> {
    controller
        .store()
        .resolve_device(identifier)
        .ok_or_else(|| CoreError::DeviceNotFound {
            identifier: identifier.into(),
        })
}

/// Resolve a scene by id or case-insensitive name.
pub fn resolve_scene(controller: &Controller, identifier: &str) -> Result<Arc<Scene>, CoreError> {
    let store = controller.store();
    store
        .scene(identifier)
        .or_else(|| {
            store
                .scenes_snapshot()
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(identifier))
                .cloned()
        })
        .ok_or_else(|| CoreError::SceneNotFound {
            identifier: identifier.into(),
        })
}

/// Parse a command-line value as JSON, falling back to a bare string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_parse_as_json_first() {
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("80"), json!(80));
        assert_eq!(parse_value(r#"{"r":255,"g":0,"b":0}"#), json!({"r":255,"g":0,"b":0}));
    }

    #[test]
    fn non_json_values_become_strings() {
        assert_eq!(parse_value("#ff0000"), json!("#ff0000"));
    }
}
