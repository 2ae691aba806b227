//! Command dispatch: CLI args -> core Commands -> output formatting.

pub mod config_cmd;
pub mod control;
pub mod devices;
pub mod scenes;
pub mod util;
pub mod watch;

use huesync_core::BridgeConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a bridge-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: BridgeConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(config, args).await,
        Command::Devices(args) => devices::handle(config, args, global).await,
        Command::Scenes => scenes::list(config, global).await,
        Command::Set(args) => control::set(config, args, global).await,
        Command::Scene(args) => scenes::recall(config, args, global).await,
        Command::Rename(args) => control::rename(config, args, global).await,
        Command::Effect(args) => control::effect(config, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
