pub mod run;
pub mod status;
pub mod stop;

use std::path::PathBuf;

use anyhow::{Context, Result};

use synco_core::config::CONFIG_FILE_NAME;

/// Pick the configuration file: an explicit path wins, then `./synco.json`,
/// then `<user config dir>/synco/synco.json`.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(local);
    }
    let base = dirs::config_dir().context("could not determine the user config directory")?;
    Ok(base.join("synco").join(CONFIG_FILE_NAME))
}
