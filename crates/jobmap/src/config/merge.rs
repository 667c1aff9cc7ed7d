use std::path::PathBuf;

use crate::paths::ROOT_ENV;

use super::{Config, ConfigLayer, LOG_ENV, POLL_INTERVAL_ENV};

/// Apply the user layer, then the workspace layer, over the defaults.
pub fn merge_layers(user: Option<ConfigLayer>, workspace: Option<ConfigLayer>) -> Config {
    let mut config = Config::default();
    if let Some(layer) = user {
        layer.apply_to(&mut config);
    }
    if let Some(layer) = workspace {
        layer.apply_to(&mut config);
    }
    config
}

pub fn apply_env_overrides(config: &mut Config) {
    apply_env_overrides_from(config, |key| std::env::var(key).ok());
}

/// Same as [`apply_env_overrides`] with an explicit variable lookup.
pub fn apply_env_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup(ROOT_ENV) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.root_dir = Some(PathBuf::from(trimmed));
        }
    }

    if let Some(raw) = lookup(POLL_INTERVAL_ENV) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            match trimmed.parse::<u64>() {
                Ok(0) => {
                    tracing::warn!("invalid {POLL_INTERVAL_ENV}, ignoring: must be positive");
                }
                Ok(value) => {
                    config.poll_interval_ms = value;
                }
                Err(err) => {
                    tracing::warn!("invalid {POLL_INTERVAL_ENV}, ignoring: {err}");
                }
            }
        }
    }

    if let Some(raw) = lookup(LOG_ENV) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.logging.filter = Some(trimmed.to_string());
        }
    }
}
