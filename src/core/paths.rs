use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Environment variable that overrides the settings file location.
pub const CONFIG_ENV: &str = "ROLLOUT_CONFIG";

/// Base rollout config directory (~/.config/rollout/ on all platforms)
pub fn rollout() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("rollout"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("rollout"))
    }
}

/// Default settings file path
pub fn rollout_json() -> Result<PathBuf> {
    Ok(rollout()?.join("rollout.json"))
}

/// Resolve the settings file: explicit path, then $ROLLOUT_CONFIG, then the default.
pub fn settings_file(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(shellexpand::tilde(path).to_string()));
    }

    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
        }
    }

    rollout_json()
}
