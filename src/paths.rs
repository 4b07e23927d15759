//! Path resolution for fleetcfg
//!
//! # Fleet File Resolution Priority
//!
//! 1. `--config` flag (or `FLEETCFG_CONFIG`, handled by clap)
//! 2. `XDG_CONFIG_HOME/fleetcfg/fleet.toml` (if set)
//! 3. `~/.config/fleetcfg/fleet.toml`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// File name of the fleet file inside the config directory
pub const FLEET_FILE: &str = "fleet.toml";

/// Get the fleetcfg config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("fleetcfg");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("fleetcfg");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Resolve the fleet file, preferring an explicit path
pub fn fleet_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(expand(&path.to_string_lossy())),
        None => Ok(config_dir()?.join(FLEET_FILE)),
    }
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
