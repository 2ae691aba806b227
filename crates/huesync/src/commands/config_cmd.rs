//! Config subcommand handlers.

use std::fmt::Write as _;
use std::io::BufRead;

use huesync_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

/// Format config for display, masking the app key.
fn format_config_redacted(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "insecure = {}", cfg.defaults.insecure);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "bridge = \"{}\"", p.bridge);
        if p.app_key.is_some() {
            let _ = writeln!(out, "app_key = \"****\"");
        }
        if let Some(ref env) = p.app_key_env {
            let _ = writeln!(out, "app_key_env = \"{env}\"");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        let _ = writeln!(out, "event_stream = {}", p.event_stream);
        let _ = writeln!(out, "retry_interval = {}", p.retry_interval);
        if !p.product_numbers.is_empty() {
            let _ = writeln!(out, "# {} product number mappings", p.product_numbers.len());
        }
    }

    out
}

fn read_key_from_stdin() -> Result<String, CliError> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_owned())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);

    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            output::print_output(&format_config_redacted(&cfg), global.quiet);
            Ok(())
        }

        ConfigCommand::Init {
            url,
            name,
            app_key_env,
            force,
        } => {
            huesync_config::parse_bridge_url(&url)?;

            let mut cfg = config::load_config_or_default();
            if cfg.profiles.contains_key(&name) && !force {
                return Err(CliError::Validation {
                    field: "name".into(),
                    reason: format!("profile '{name}' already exists (use --force to replace it)"),
                });
            }

            let mut profile = Profile::new(url);
            profile.app_key_env = app_key_env;
            cfg.profiles.insert(name.clone(), profile);
            if cfg.profiles.len() == 1 {
                cfg.default_profile = Some(name.clone());
            }
            let path = config::save_config(&cfg)?;

            output::print_output(
                &output::success(
                    &format!("profile '{name}' written to {}", path.display()),
                    color,
                ),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::SetKey { key } => {
            let key = match key {
                Some(key) => key.trim().to_owned(),
                None => read_key_from_stdin()?,
            };
            if key.is_empty() {
                return Err(CliError::Validation {
                    field: "app_key".into(),
                    reason: "app key cannot be empty".into(),
                });
            }

            let cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            huesync_config::store_app_key(&profile_name, &key)?;

            output::print_output(
                &output::success(
                    &format!("app key for profile '{profile_name}' stored in the system keyring"),
                    color,
                ),
                global.quiet,
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_config_masks_the_app_key() {
        let mut cfg = Config::default();
        let mut profile = Profile::new("https://192.168.1.20");
        profile.app_key = Some("very-secret".into());
        cfg.profiles.insert("home".into(), profile);

        let shown = format_config_redacted(&cfg);
        assert!(shown.contains("[profiles.home]"));
        assert!(shown.contains("app_key = \"****\""));
        assert!(!shown.contains("very-secret"));
    }
}
