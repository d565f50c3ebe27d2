pub mod ask;
pub mod config_cmd;
pub mod schema;
pub mod serve;

use std::path::Path;

use fieldsage_config::AppConfig;
use tracing::debug;

/// Load config from `path`, or from the default location when none is given.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    debug!(path = ?path, "Loading configuration");
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}
