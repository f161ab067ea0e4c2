// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a config file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Read, deserialize and validate a config file.
///
/// A missing `[config].base_dir` is filled with the config file's directory,
/// so relative artifact paths and commands resolve next to the file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let mut raw = load_from_path(path)?;
    if raw.config.base_dir.is_none() {
        raw.config.base_dir = Some(config_root_dir(path));
    }
    let config = ConfigFile::try_from(raw)?;
    debug!(
        config = ?path,
        nodes = config.node.len(),
        connectors = config.connector.len(),
        "configuration loaded"
    );
    Ok(config)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("Checktree.toml")
}

/// Directory holding the config file, or the working directory for a bare
/// file name.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
