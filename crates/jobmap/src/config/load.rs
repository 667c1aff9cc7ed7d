use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::{Layout, ROOT_ENV};
use crate::persist::atomic_write;

use super::merge::{apply_env_overrides_from, merge_layers};
use super::{Config, ConfigError, ConfigLayer};

/// `~/.config/jobmap/config.toml`, when the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("jobmap").join("config.toml"))
}

pub fn load_layer(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Load the user and workspace layers and apply environment overrides.
pub fn load() -> Result<Config, ConfigError> {
    load_with(
        user_config_path().as_deref(),
        None,
        |key| std::env::var(key).ok(),
    )
}

/// Like [`load`], but the workspace root is fixed to `root`.
pub fn load_for_root(root: &Path) -> Result<Config, ConfigError> {
    load_with(
        user_config_path().as_deref(),
        Some(root),
        |key| std::env::var(key).ok(),
    )
}

pub(crate) fn load_with(
    user_path: Option<&Path>,
    root: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let user = match user_path {
        Some(path) => load_layer(path)?,
        None => None,
    };

    // The workspace layer lives under the root, so settle the root first.
    let root = match root {
        Some(root) => root.to_path_buf(),
        None => {
            let mut probe = merge_layers(user.clone(), None);
            if let Some(dir) = lookup(ROOT_ENV).filter(|dir| !dir.trim().is_empty()) {
                probe.root_dir = Some(PathBuf::from(dir.trim()));
            }
            probe.root()
        }
    };
    let workspace = load_layer(&Layout::new(&root).config_path())?;

    let mut config = merge_layers(user, workspace);
    apply_env_overrides_from(&mut config, lookup);
    config.root_dir = Some(root);
    Ok(config)
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    let contents = toml::to_string_pretty(cfg)?;
    atomic_write(path, contents.as_bytes())?;
    Ok(())
}
