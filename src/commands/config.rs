use clap::{Args, Subcommand};
use serde::Serialize;

use rollout::paths;
use rollout::settings::Settings;

use super::CmdResult;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Display the loaded settings with defaults applied
    Show,
    /// Show which settings file would be loaded
    Path,
}

#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<Settings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
}

pub fn run(args: ConfigArgs, global: &crate::commands::GlobalArgs) -> CmdResult<ConfigOutput> {
    match args.command {
        ConfigCommand::Show => show(global),
        ConfigCommand::Path => path(global),
    }
}

fn show(global: &crate::commands::GlobalArgs) -> CmdResult<ConfigOutput> {
    let mut settings = global.load_settings()?;
    if settings.new_relic.api_key.is_some() {
        settings.new_relic.api_key = Some("********".to_string());
    }

    Ok((
        ConfigOutput {
            command: "config.show".to_string(),
            settings: Some(settings),
            path: None,
            exists: None,
        },
        0,
    ))
}

fn path(global: &crate::commands::GlobalArgs) -> CmdResult<ConfigOutput> {
    let path = paths::settings_file(global.config.as_deref())?;

    Ok((
        ConfigOutput {
            command: "config.path".to_string(),
            settings: None,
            exists: Some(path.exists()),
            path: Some(path.display().to_string()),
        },
        0,
    ))
}
