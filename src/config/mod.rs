mod types;

pub use types::*;

use crate::{Error, Result};
use std::{env, path::Path};
use tracing::debug;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Loads the configuration from `CONFIG_PATH`, falling back to `config.yaml`.
///
/// Built-in defaults apply only when `CONFIG_PATH` is unset and the default
/// file does not exist. Hub credentials and endpoint may be overridden with
/// `HF_TOKEN` and `HF_ENDPOINT`.
pub async fn load() -> Result<Config> {
    let mut config = match env::var("CONFIG_PATH") {
        Ok(path) => load_from(&path).await?,
        Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            load_from(DEFAULT_CONFIG_PATH).await?
        }
        Err(_) => {
            debug!("No configuration file found, using defaults");
            Config::default()
        }
    };

    apply_env_overrides(&mut config, |key| env::var(key).ok());
    config.validate()?;

    Ok(config)
}

async fn load_from(config_path: &str) -> Result<Config> {
    debug!("Loading configuration from: {}", config_path);

    let config_str = tokio::fs::read_to_string(config_path).await?;
    Config::from_yaml(&config_str)
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup("HF_TOKEN").filter(|t| !t.is_empty()) {
        config.hub.token = Some(token);
    }
    if let Some(endpoint) = lookup("HF_ENDPOINT").filter(|e| !e.is_empty()) {
        config.hub.endpoint = endpoint;
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.base.trim().is_empty() {
            return Err(Error::config("model.base must not be empty"));
        }
        if self.model.adapter.trim().is_empty() {
            return Err(Error::config("model.adapter must not be empty"));
        }
        if self.model.max_shard_bytes == 0 {
            return Err(Error::config("model.max_shard_bytes must be positive"));
        }
        if self.engine.max_model_len == 0 {
            return Err(Error::config("engine.max_model_len must be positive"));
        }
        if !(self.sampling.top_p > 0.0 && self.sampling.top_p <= 1.0) {
            return Err(Error::config(format!(
                "sampling.top_p must be in (0, 1], got {}",
                self.sampling.top_p
            )));
        }
        if self.sampling.temperature < 0.0 {
            return Err(Error::config(format!(
                "sampling.temperature must not be negative, got {}",
                self.sampling.temperature
            )));
        }
        Ok(())
    }
}
