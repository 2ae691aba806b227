//! Write handlers: channel values, renames, and light effects.

use std::time::Duration;

use huesync_core::{BridgeConfig, Command as CoreCommand, CommandResult};

use crate::cli::{EffectArgs, GlobalOpts, RenameArgs, SetArgs};
use crate::error::CliError;
use crate::output;

use super::util;

fn report(global: &GlobalOpts, message: &str) {
    let color = output::should_color(&global.color);
    output::print_output(&output::success(message, color), global.quiet);
}

pub async fn set(config: BridgeConfig, args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let value = util::parse_value(&args.value);
    let channel_id = args.channel.clone();

    let (device_name, result) = util::with_synced(config, |controller| async move {
        let entry = util::resolve_device(&controller, &args.device)?;
        let result = controller
            .execute(CoreCommand::ChannelWrite {
                device_id: entry.device.external_id.clone(),
                channel_id: args.channel,
                value,
            })
            .await?;
        Ok((entry.device.name.clone(), result))
    })
    .await?;

    let message = match result {
        CommandResult::Written { value: Some(v) } => {
            format!("{device_name}: {channel_id} set to {v}")
        }
        _ => format!("{device_name}: {channel_id} written"),
    };
    report(global, &message);
    Ok(())
}

pub async fn rename(
    config: BridgeConfig,
    args: RenameArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let name = args.name.trim().to_owned();
    if name.is_empty() {
        return Err(CliError::Validation {
            field: "name".into(),
            reason: "device name cannot be empty".into(),
        });
    }

    let requested = name.clone();
    let device_id = util::with_synced(config, |controller| async move {
        let entry = util::resolve_device(&controller, &args.device)?;
        let device_id = entry.device.external_id.clone();
        controller
            .execute(CoreCommand::DeviceRename {
                device_id: device_id.clone(),
                name: requested,
            })
            .await?;
        Ok(device_id)
    })
    .await?;

    report(global, &format!("{device_id} renamed to \"{name}\""));
    Ok(())
}

pub async fn effect(
    config: BridgeConfig,
    args: EffectArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let effect_id = args.effect.clone();
    let duration = args.duration.map(Duration::from_millis);

    let device_name = util::with_synced(config, |controller| async move {
        let entry = util::resolve_device(&controller, &args.device)?;
        controller
            .execute(CoreCommand::DeviceEffect {
                device_id: entry.device.external_id.clone(),
                effect_id: args.effect,
                duration,
            })
            .await?;
        Ok(entry.device.name.clone())
    })
    .await?;

    report(global, &format!("{device_name}: effect {effect_id} started"));
    Ok(())
}
