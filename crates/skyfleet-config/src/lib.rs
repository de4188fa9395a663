//! Skyfleet configuration
//!
//! A flat JSON file with one required key, `iam_instance_profile`, and
//! a handful of optional lists that default to empty. Unrecognized keys
//! are ignored so a config file can be shared with other tooling.

pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};

use serde::Deserialize;
use skyfleet_cloud::PerInstanceRule;

/// Environment variable pointing directly at a config file.
pub const CONFIG_PATH_ENV: &str = "SKYFLEET_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// IAM instance profile associated with every launched instance.
    pub iam_instance_profile: String,

    /// Security-group rules opened for each launched instance.
    #[serde(default)]
    pub per_instance_security_group_rules: Vec<PerInstanceRule>,

    /// `(source, mount_point)` pairs mounted during initialization.
    #[serde(default)]
    pub default_efs_volumes: Vec<(String, String)>,

    /// Where to look for Makefiles during initialization.
    #[serde(default)]
    pub makefile_root_dirs: Vec<String>,

    /// Where to look for docker-compose files during initialization.
    #[serde(default)]
    pub docker_compose_yaml_root_dirs: Vec<String>,
}

/// Find the config file.
///
/// Search order:
/// 1. `SKYFLEET_CONFIG_PATH` environment variable
/// 2. `skyfleet.json`, `.skyfleet.json` in the current directory
/// 3. `~/.config/skyfleet/config.json`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Ok(current_dir) = std::env::current_dir() {
        for filename in ["skyfleet.json", ".skyfleet.json"] {
            let path = current_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("skyfleet").join("config.json");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Load a config file from an explicit path.
pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Invalid {
        path: path.to_path_buf(),
        source,
    })
}

/// Find and load the configuration.
pub fn load_config() -> Result<Config> {
    load(&find_config_file()?)
}
