pub mod chat;
pub mod config_cmd;
pub mod doctor;
pub mod serve;

use std::path::Path;

use concierge_config::{AppConfig, ConfigError};

/// Load from `path` if given, else the default location, with env overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(p) => AppConfig::load_with_env(p),
        None => AppConfig::load(),
    }
}
