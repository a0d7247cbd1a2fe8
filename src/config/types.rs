use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hub repository id or local directory of the base model.
    #[serde(default = "default_base_model")]
    pub base: String,
    /// Hub repository id or local directory of the LoRA adapter.
    #[serde(default = "default_adapter")]
    pub adapter: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default = "default_revision")]
    pub adapter_revision: String,
    /// Where the merged weights and tokenizer are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_auto")]
    pub dtype: String,
    #[serde(default = "default_auto")]
    pub device: String,
    #[serde(default = "default_max_shard_bytes")]
    pub max_shard_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_hub_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on prompt plus generated tokens for one sequence.
    #[serde(default = "default_max_model_len")]
    pub max_model_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub logs: LogsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base: default_base_model(),
            adapter: default_adapter(),
            revision: default_revision(),
            adapter_revision: default_revision(),
            output_dir: default_output_dir(),
            dtype: default_auto(),
            device: default_auto(),
            max_shard_bytes: default_max_shard_bytes(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_hub_endpoint(),
            token: None,
            cache_dir: default_cache_dir(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_model_len: default_max_model_len(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            seed: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            logs: LogsConfig::default(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_base_model() -> String {
    "mistralai/mistral-7b-v0.1".to_string()
}

fn default_adapter() -> String {
    "goaiguru/mistral-technical-docs".to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./merged_model")
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_max_shard_bytes() -> u64 {
    5_000_000_000
}

fn default_hub_endpoint() -> String {
    "https://huggingface.co".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache/hub")
}

fn default_max_model_len() -> usize {
    32768
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.95
}

fn default_max_tokens() -> usize {
    256
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}
