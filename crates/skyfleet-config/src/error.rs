use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "no configuration file found. Checked:\n\
        - current directory: skyfleet.json, .skyfleet.json\n\
        - ~/.config/skyfleet/config.json\n\
        A path can also be given directly via SKYFLEET_CONFIG_PATH"
    )]
    ConfigFileNotFound,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    Invalid {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
