// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a configuration file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}

/// Deserialize configuration text.
pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a configuration file and validate it into a [`ConfigFile`].
///
/// Relative `driver` paths are resolved against the directory holding the
/// config file, so a config can be used from any working directory.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let mut raw = load_from_path(path)?;

    let base = config_root_dir(path);
    for method in raw.method.values_mut() {
        if method.driver.is_relative() {
            method.driver = base.join(&method.driver);
        }
    }

    ConfigFile::try_from(raw)
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Pipefleet.toml")
}

fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
