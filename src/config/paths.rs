use std::path::PathBuf;

use anyhow::{Context, Result};

/// Returns the global config path: ~/.config/loggerator/default.toml
pub fn global_config_path() -> Result<PathBuf> {
    let config = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config.join("loggerator").join("default.toml"))
}
