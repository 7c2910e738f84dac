use chat_replay::ReplayConfig;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

/// Load replay settings, falling back to defaults without a config file.
pub fn load(path: Option<&Path>) -> Result<ReplayConfig> {
    let Some(path) = path else {
        return Ok(ReplayConfig::default());
    };
    debug!("Loading config from {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}
