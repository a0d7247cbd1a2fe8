//! Base model loading, LoRA adapter loading, merging and persistence.
//!
//! The files follow the Hugging Face layout: `config.json`, safetensors
//! weights (single file or shards listed in an index) and tokenizer files.

pub mod adapter;
pub mod loader;
pub mod merger;
pub mod saver;

pub use adapter::{AdapterConfig, LoraAdapter, LoraLayer, load_adapter};
pub use loader::{BaseModel, load_base_model};
pub use merger::{MergeReport, merge_lora_weights};
pub use saver::{copy_files, save_config, save_weights};

use crate::{Error, Result};
use candle_core::{DType, Device};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

pub const CONFIG_FILE: &str = "config.json";
pub const GENERATION_CONFIG_FILE: &str = "generation_config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const TOKENIZER_EXTRA_FILES: [&str; 3] = [
    "tokenizer_config.json",
    "special_tokens_map.json",
    "tokenizer.model",
];
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";

#[derive(Debug, Deserialize)]
struct WeightIndex {
    weight_map: BTreeMap<String, String>,
}

/// Distinct shard file names referenced by a safetensors index, sorted.
pub fn shard_files(index_path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(index_path)?;
    let index: WeightIndex = serde_json::from_str(&contents)?;

    let shards: BTreeSet<String> = index.weight_map.into_values().collect();
    if shards.is_empty() {
        return Err(Error::merge(format!(
            "{} lists no weight files",
            index_path.display()
        )));
    }

    Ok(shards.into_iter().collect())
}

/// Weight files of a model directory on local storage.
pub fn local_weight_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let index = dir.join(WEIGHTS_INDEX_FILE);
    if index.is_file() {
        return Ok(shard_files(&index)?
            .into_iter()
            .map(|shard| dir.join(shard))
            .collect());
    }

    let single = dir.join(WEIGHTS_FILE);
    if single.is_file() {
        return Ok(vec![single]);
    }

    Err(Error::FileNotFound {
        repo: dir.display().to_string(),
        file: WEIGHTS_FILE.to_string(),
    })
}

pub fn resolve_device(value: &str) -> Result<Device> {
    let device = match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Device::cuda_if_available(0)?,
        "cpu" => Device::Cpu,
        "cuda" => Device::new_cuda(0)?,
        other => match other.strip_prefix("cuda:").map(str::parse::<usize>) {
            Some(Ok(ordinal)) => Device::new_cuda(ordinal)?,
            _ => return Err(Error::config(format!("Unknown device: '{}'", value))),
        },
    };
    Ok(device)
}

/// `auto` picks half precision on accelerators and f32 on CPU.
pub fn resolve_dtype(value: &str, device: &Device) -> Result<DType> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" if device.is_cpu() => Ok(DType::F32),
        "auto" => Ok(DType::F16),
        "f16" | "float16" | "fp16" => Ok(DType::F16),
        "bf16" | "bfloat16" => Ok(DType::BF16),
        "f32" | "float32" | "fp32" => Ok(DType::F32),
        _ => Err(Error::config(format!("Unsupported dtype: '{}'", value))),
    }
}

/// Name used for `torch_dtype` in `config.json`.
pub fn torch_dtype_name(dtype: DType) -> &'static str {
    match dtype {
        DType::F16 => "float16",
        DType::BF16 => "bfloat16",
        DType::F32 => "float32",
        DType::F64 => "float64",
        other => other.as_str(),
    }
}
