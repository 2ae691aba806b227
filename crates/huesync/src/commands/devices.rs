//! Device listing and detail handlers.

use std::fmt::Write as _;

use tabled::Tabled;

use huesync_core::{BridgeConfig, ChannelKey, Controller, DeviceEntry};

use crate::cli::{DevicesArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Channels")]
    channels: String,
}

impl From<&DeviceEntry> for DeviceRow {
    fn from(e: &DeviceEntry) -> Self {
        Self {
            id: e.device.external_id.clone(),
            name: e.device.name.clone(),
            class: format!("{:?}", e.device.class),
            model: e.device.model.clone(),
            channels: e
                .channels
                .iter()
                .map(|c| match c.last_value {
                    Some(ref v) => format!("{}={v}", c.id),
                    None => c.id.clone(),
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

#[derive(Tabled)]
struct ChannelRow {
    #[tabled(rename = "Channel")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Access")]
    access: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unit")]
    unit: String,
}

fn detail(e: &DeviceEntry, color: bool) -> String {
    let d = &e.device;
    let mut out = String::new();
    let _ = writeln!(out, "{}", output::heading(&d.name, color));
    let _ = writeln!(out, "ID:           {}", d.external_id);
    let _ = writeln!(out, "Class:        {:?}", d.class);
    let _ = writeln!(out, "Manufacturer: {}", d.manufacturer);
    let _ = writeln!(out, "Model:        {}", d.model);
    let _ = writeln!(out, "Firmware:     {}", d.firmware);
    if !d.effects.is_empty() {
        let ids: Vec<&str> = d.effects.iter().map(|fx| fx.id.as_str()).collect();
        let _ = writeln!(out, "Effects:      {}", ids.join(", "));
    }

    let rows: Vec<ChannelRow> = e
        .channels
        .iter()
        .map(|c| ChannelRow {
            id: c.id.clone(),
            kind: c.kind.to_string(),
            access: match (c.flags.read, c.flags.write) {
                (true, true) => "rw".into(),
                (false, true) => "w".into(),
                _ => "r".into(),
            },
            value: c
                .last_value
                .as_ref()
                .map_or_else(|| "-".into(), ToString::to_string),
            unit: c.unit.clone().unwrap_or_default(),
        })
        .collect();
    let _ = write!(out, "{}", output::render_table(&rows));
    out
}

/// A copy of `entry` with each channel's `last_value` filled from the store.
fn with_values(controller: &Controller, entry: &DeviceEntry) -> DeviceEntry {
    let store = controller.store();
    let mut entry = entry.clone();
    for channel in &mut entry.channels {
        let key = ChannelKey::new(&entry.device.external_id, &channel.id);
        channel.last_value = store.value_of(&key).map(|s| s.value.clone());
    }
    entry
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    config: BridgeConfig,
    args: DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let color = output::should_color(&global.color);

    let rendered = match args.device {
        Some(identifier) => {
            let entry = util::with_synced(config, |controller| async move {
                let entry = util::resolve_device(&controller, &identifier)?;
                Ok(with_values(&controller, &entry))
            })
            .await?;
            output::render_single(
                &global.output,
                &entry,
                |e| detail(e, color),
                |e| e.device.external_id.clone(),
            )?
        }
        None => {
            let entries = util::with_synced(config, |controller| async move {
                let snapshot = controller.devices_snapshot();
                Ok(snapshot
                    .iter()
                    .map(|e| with_values(&controller, e))
                    .collect::<Vec<_>>())
            })
            .await?;
            output::render_list(
                &global.output,
                &entries,
                |e| DeviceRow::from(e),
                |e| e.device.external_id.clone(),
            )?
        }
    };

    output::print_output(&rendered, global.quiet);
    Ok(())
}
