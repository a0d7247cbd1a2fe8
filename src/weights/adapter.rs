use super::{ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE};
use crate::{Error, Result, hub::Repo};
use candle_core::{Device, Tensor};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

const PEFT_PREFIX: &str = "base_model.model.";

/// The subset of a PEFT `adapter_config.json` that affects merging.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub peft_type: Option<String>,
    #[serde(default = "default_rank")]
    pub r: usize,
    #[serde(default = "default_alpha")]
    pub lora_alpha: f64,
    #[serde(default)]
    pub use_rslora: bool,
    #[serde(default)]
    pub use_dora: bool,
    #[serde(default)]
    pub fan_in_fan_out: bool,
    #[serde(default)]
    pub rank_pattern: HashMap<String, usize>,
    #[serde(default)]
    pub alpha_pattern: HashMap<String, f64>,
    #[serde(default)]
    pub target_modules: Option<serde_json::Value>,
    #[serde(default)]
    pub base_model_name_or_path: Option<String>,
}

fn default_rank() -> usize {
    8
}

fn default_alpha() -> f64 {
    8.0
}

impl AdapterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: AdapterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(peft_type) = &self.peft_type {
            if !peft_type.eq_ignore_ascii_case("lora") {
                return Err(Error::merge(format!(
                    "Unsupported adapter type: {}",
                    peft_type
                )));
            }
        }
        if self.use_dora {
            return Err(Error::merge("DoRA adapters cannot be merged"));
        }
        if self.r == 0 {
            return Err(Error::merge("Adapter rank must be positive"));
        }
        Ok(())
    }

    pub fn rank_for(&self, module: &str) -> usize {
        match_pattern(&self.rank_pattern, module)
            .copied()
            .unwrap_or(self.r)
    }

    pub fn alpha_for(&self, module: &str) -> f64 {
        match_pattern(&self.alpha_pattern, module)
            .copied()
            .unwrap_or(self.lora_alpha)
    }

    /// Factor applied to `B @ A` before it is added to the base weight.
    pub fn scaling(&self, module: &str, rank: usize) -> f64 {
        let alpha = self.alpha_for(module);
        if self.use_rslora {
            alpha / (rank as f64).sqrt()
        } else {
            alpha / rank as f64
        }
    }
}

/// Longest pattern that equals the module name or matches it as a
/// dot-separated suffix.
fn match_pattern<'a, T>(patterns: &'a HashMap<String, T>, module: &str) -> Option<&'a T> {
    patterns
        .iter()
        .filter(|(key, _)| module == key.as_str() || module.ends_with(&format!(".{}", key)))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, value)| value)
}

/// Low-rank pair for one linear module: `A` is `r x in`, `B` is `out x r`.
#[derive(Debug, Clone)]
pub struct LoraLayer {
    pub a: Tensor,
    pub b: Tensor,
}

#[derive(Debug, Clone)]
pub struct LoraAdapter {
    pub config: AdapterConfig,
    /// Keyed by base module path, e.g. `model.layers.0.self_attn.q_proj`.
    pub layers: BTreeMap<String, LoraLayer>,
    /// Fully trained tensors that replace base tensors of the same name.
    pub replacements: BTreeMap<String, Tensor>,
}

enum AdapterKey {
    A(String),
    B(String),
    Replacement(String),
}

fn classify_key(key: &str) -> Result<AdapterKey> {
    let name = key.strip_prefix(PEFT_PREFIX).unwrap_or(key);

    for (marker, is_a) in [(".lora_A.", true), (".lora_B.", false)] {
        if let Some((module, rest)) = name.split_once(marker) {
            if rest != "weight" && !rest.ends_with(".weight") {
                return Err(Error::merge(format!("Unsupported LoRA tensor: {}", key)));
            }
            let module = module.to_string();
            return Ok(if is_a {
                AdapterKey::A(module)
            } else {
                AdapterKey::B(module)
            });
        }
    }

    if name.contains("lora_") {
        return Err(Error::merge(format!("Unsupported LoRA tensor: {}", key)));
    }

    // `lm_head.modules_to_save.default.weight` -> `lm_head.weight`
    let name = match name.split_once(".modules_to_save.") {
        Some((module, rest)) => {
            let leaf = rest.rsplit('.').next().unwrap_or(rest);
            format!("{}.{}", module, leaf)
        }
        None => name.to_string(),
    };
    Ok(AdapterKey::Replacement(name))
}

impl LoraAdapter {
    pub fn from_tensors(config: AdapterConfig, tensors: HashMap<String, Tensor>) -> Result<Self> {
        let mut a_tensors = BTreeMap::new();
        let mut b_tensors = BTreeMap::new();
        let mut replacements = BTreeMap::new();

        for (key, tensor) in tensors {
            match classify_key(&key)? {
                AdapterKey::A(module) => {
                    a_tensors.insert(module, tensor);
                }
                AdapterKey::B(module) => {
                    b_tensors.insert(module, tensor);
                }
                AdapterKey::Replacement(name) => {
                    replacements.insert(name, tensor);
                }
            }
        }

        let mut layers = BTreeMap::new();
        for (module, a) in a_tensors {
            let b = b_tensors.remove(&module).ok_or_else(|| {
                Error::merge(format!("Module {} has lora_A but no lora_B", module))
            })?;
            layers.insert(module, LoraLayer { a, b });
        }
        if let Some(module) = b_tensors.keys().next() {
            return Err(Error::merge(format!(
                "Module {} has lora_B but no lora_A",
                module
            )));
        }

        Ok(Self {
            config,
            layers,
            replacements,
        })
    }
}

pub async fn load_adapter(repo: &Repo, device: &Device) -> Result<LoraAdapter> {
    let config_path = repo.get(ADAPTER_CONFIG_FILE).await?;
    let config = AdapterConfig::from_json(&tokio::fs::read_to_string(&config_path).await?)?;

    let weights_path = repo.get(ADAPTER_WEIGHTS_FILE).await?;
    let tensors = candle_core::safetensors::load(&weights_path, device)?;

    let adapter = LoraAdapter::from_tensors(config, tensors)?;
    if adapter.layers.is_empty() && adapter.replacements.is_empty() {
        warn!("Adapter {} contains no tensors", repo.source());
    }

    info!(
        "Loaded adapter from {} (r={}, alpha={}, {} LoRA modules, {} replaced tensors)",
        repo.source(),
        adapter.config.r,
        adapter.config.lora_alpha,
        adapter.layers.len(),
        adapter.replacements.len()
    );
    if let Some(base) = &adapter.config.base_model_name_or_path {
        info!("Adapter was trained on {}", base);
    }

    Ok(adapter)
}
