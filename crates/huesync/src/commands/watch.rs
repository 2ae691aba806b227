//! `huesync watch`: stream sink events as JSON lines until Ctrl-C.

use std::io::{self, Write};

use tokio::sync::broadcast;
use tracing::{info, warn};

use huesync_core::{BridgeConfig, Controller, SinkEvent};

use crate::cli::WatchArgs;
use crate::error::CliError;

/// The device an event is about, if any.
fn event_device(event: &SinkEvent) -> Option<&str> {
    match event {
        SinkEvent::DeviceUpsert { device, .. } => Some(&device.external_id),
        SinkEvent::DeviceRemove { device_id } | SinkEvent::ChannelValue { device_id, .. } => {
            Some(device_id)
        }
        _ => None,
    }
}

/// Whether `event` passes the `--device` filter. Lifecycle events
/// (connectivity, full sync) always pass.
fn passes(event: &SinkEvent, target: Option<&str>) -> bool {
    match (target, event) {
        (None, _) | (_, SinkEvent::Connectivity { .. } | SinkEvent::FullSyncCompleted) => true,
        (Some(target), event) => event_device(event) == Some(target),
    }
}

pub async fn handle(config: BridgeConfig, args: WatchArgs) -> Result<(), CliError> {
    let controller = Controller::new(config);
    let mut events = controller.events();
    controller.connect().await?;
    info!("watching bridge, press Ctrl-C to stop");

    let mut seen_full_sync = false;
    let result = loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break Ok(()),
            received = events.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "watch output fell behind");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                };

                let initial = !seen_full_sync;
                if matches!(*event, SinkEvent::FullSyncCompleted) {
                    seen_full_sync = true;
                }
                if args.changes_only && initial {
                    continue;
                }

                // Names resolve once the device is in the store.
                let target = args.device.as_deref().map(|wanted| {
                    controller
                        .store()
                        .resolve_device(wanted)
                        .map_or_else(|| wanted.to_owned(), |e| e.device.external_id.clone())
                });
                if !passes(&event, target.as_deref()) {
                    continue;
                }

                let line = match serde_json::to_string(&*event) {
                    Ok(line) => line,
                    Err(e) => break Err(e.into()),
                };
                let mut stdout = io::stdout().lock();
                if writeln!(stdout, "{line}").and_then(|()| stdout.flush()).is_err() {
                    // Downstream pipe closed.
                    break Ok(());
                }
            }
        }
    };

    controller.disconnect().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use huesync_core::ChannelValue;

    fn value(device_id: &str) -> SinkEvent {
        SinkEvent::ChannelValue {
            device_id: device_id.into(),
            channel_id: "on".into(),
            value: ChannelValue::Bool(true),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn device_filter_keeps_matching_events() {
        assert!(passes(&value("d1"), Some("d1")));
        assert!(!passes(&value("d2"), Some("d1")));
        assert!(passes(&value("d2"), None));
    }

    #[test]
    fn lifecycle_events_always_pass() {
        assert!(passes(&SinkEvent::FullSyncCompleted, Some("d1")));
        assert!(passes(&SinkEvent::Connectivity { connected: false }, Some("d1")));
        assert!(!passes(
            &SinkEvent::RoomRemove {
                room_id: "r1".into()
            },
            Some("d1")
        ));
    }
}
