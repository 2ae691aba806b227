//! Clap derive structures for the `huesync` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// huesync -- mirror and control a Hue bridge
#[derive(Debug, Parser)]
#[command(
    name = "huesync",
    version,
    about = "Mirror and control Philips Hue bridges from the command line",
    long_about = "Keeps a live model of a Hue bridge (devices, channels, rooms, zones,\n\
        and scenes) from CLIP v2 snapshots and the event stream, and translates\n\
        channel writes, scene recalls, and renames into bridge requests.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Bridge profile to use
    #[arg(long, short = 'p', env = "HUESYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Bridge URL (overrides profile)
    #[arg(long, short = 'b', env = "HUESYNC_BRIDGE", global = true)]
    pub bridge: Option<String>,

    /// Application key issued by the bridge
    #[arg(long, env = "HUESYNC_APP_KEY", global = true, hide_env_values = true)]
    pub app_key: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HUESYNC_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept any TLS certificate, even with a configured CA
    #[arg(long, short = 'k', env = "HUESYNC_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "HUESYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream model changes as JSON lines until interrupted
    Watch(WatchArgs),

    /// List devices, or show one device with its channels
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// List scenes
    Scenes,

    /// Write a channel value
    Set(SetArgs),

    /// Recall a scene
    Scene(SceneArgs),

    /// Rename a device and wait until the bridge confirms it
    Rename(RenameArgs),

    /// Start a light effect
    Effect(EffectArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only emit events concerning this device (id or name)
    #[arg(long)]
    pub device: Option<String>,

    /// Skip the initial snapshot and print only later changes
    #[arg(long)]
    pub changes_only: bool,
}

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Device id or name; lists all devices when omitted
    pub device: Option<String>,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Device id or name
    pub device: String,

    /// Channel id (on, bri, ct, ctPreset, color)
    pub channel: String,

    /// New value as JSON (`true`, `80`, `{"r":255,"g":0,"b":0}`).
    /// Anything that is not valid JSON is sent as a string, e.g. `#ff0000`.
    pub value: String,
}

#[derive(Debug, Args)]
pub struct SceneArgs {
    /// Scene id or name
    pub scene: String,

    /// Room or zone id to recall the scene in (defaults to the scene's own scope)
    #[arg(long, short = 'g')]
    pub group: Option<String>,

    /// activate, deactivate, dynamic, or a raw bridge action
    #[arg(long, short = 'a', default_value = "activate")]
    pub action: String,
}

#[derive(Debug, Args)]
pub struct RenameArgs {
    /// Device id or name
    pub device: String,

    /// New device name
    pub name: String,
}

#[derive(Debug, Args)]
pub struct EffectArgs {
    /// Device id or name
    pub device: String,

    /// Effect id as listed by `huesync devices <device>`
    pub effect: String,

    /// Run as a timed effect for this many milliseconds
    #[arg(long, short = 'd')]
    pub duration: Option<u64>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display the current configuration with secrets masked
    Show,

    /// Create or replace a bridge profile
    Init {
        /// Bridge URL (e.g., https://192.168.1.20)
        #[arg(long = "url")]
        url: String,

        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        /// Environment variable holding the app key
        #[arg(long)]
        app_key_env: Option<String>,

        /// Replace an existing profile of the same name
        #[arg(long)]
        force: bool,
    },

    /// Store an app key in the system keyring for the active profile
    SetKey {
        /// The key; read from stdin when omitted
        key: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }
}
