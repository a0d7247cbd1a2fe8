use super::{CONFIG_FILE, WEIGHTS_FILE, WEIGHTS_INDEX_FILE, torch_dtype_name};
use crate::{Error, Result};
use candle_core::{DType, Device, Tensor};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct IndexMetadata {
    total_size: u64,
}

#[derive(Debug, Serialize)]
struct WeightIndex<'a> {
    metadata: IndexMetadata,
    weight_map: BTreeMap<&'a str, String>,
}

fn tensor_bytes(tensor: &Tensor) -> u64 {
    (tensor.elem_count() * tensor.dtype().size_in_bytes()) as u64
}

/// Groups tensor names into shards of at most `max_shard_bytes`, in name
/// order. A tensor larger than the limit gets a shard of its own.
pub(crate) fn plan_shards(sizes: &BTreeMap<&str, u64>, max_shard_bytes: u64) -> Vec<Vec<String>> {
    let mut shards: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_bytes = 0u64;

    for (name, &bytes) in sizes {
        if !current.is_empty() && current_bytes + bytes > max_shard_bytes {
            shards.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current.push(name.to_string());
        current_bytes += bytes;
    }
    if !current.is_empty() {
        shards.push(current);
    }

    shards
}

fn shard_name(index: usize, count: usize) -> String {
    format!("model-{:05}-of-{:05}.safetensors", index + 1, count)
}

/// Removes weight files left by an earlier run so a changed shard layout
/// cannot mix with stale files.
fn remove_stale_weights(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_weights = name == WEIGHTS_INDEX_FILE
            || (name.starts_with("model") && name.ends_with(".safetensors"));
        if is_weights && path.is_file() {
            debug!("Removing stale {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Writes tensors as safetensors into `dir`, sharding with an index file
/// when the total exceeds `max_shard_bytes`. Returns the written files.
pub fn save_weights(
    tensors: &HashMap<String, Tensor>,
    dir: &Path,
    max_shard_bytes: u64,
) -> Result<Vec<PathBuf>> {
    if tensors.is_empty() {
        return Err(Error::merge("No tensors to save"));
    }

    fs::create_dir_all(dir)?;
    remove_stale_weights(dir)?;

    let sizes: BTreeMap<&str, u64> = tensors
        .iter()
        .map(|(name, tensor)| (name.as_str(), tensor_bytes(tensor)))
        .collect();
    let total_size: u64 = sizes.values().sum();
    let shards = plan_shards(&sizes, max_shard_bytes);

    let mut files = Vec::with_capacity(shards.len());
    let mut weight_map = BTreeMap::new();
    for (index, names) in shards.iter().enumerate() {
        let file_name = if shards.len() == 1 {
            WEIGHTS_FILE.to_string()
        } else {
            shard_name(index, shards.len())
        };

        let mut shard = HashMap::with_capacity(names.len());
        for name in names {
            let tensor = tensors[name].to_device(&Device::Cpu)?;
            shard.insert(name.as_str(), tensor);
            weight_map.insert(name.as_str(), file_name.clone());
        }

        let path = dir.join(&file_name);
        candle_core::safetensors::save(&shard, &path)?;
        debug!("Wrote {} ({} tensors)", path.display(), names.len());
        files.push(path);
    }

    if shards.len() > 1 {
        let index = WeightIndex {
            metadata: IndexMetadata { total_size },
            weight_map,
        };
        fs::write(
            dir.join(WEIGHTS_INDEX_FILE),
            serde_json::to_string_pretty(&index)?,
        )?;
    }

    info!(
        "Saved {} tensors ({} bytes) to {} in {} file(s)",
        tensors.len(),
        total_size,
        dir.display(),
        files.len()
    );

    Ok(files)
}

/// Writes the model config with `torch_dtype` set to the saved precision.
pub fn save_config(config: &serde_json::Value, dtype: DType, dir: &Path) -> Result<PathBuf> {
    let mut config = config.clone();
    match config.as_object_mut() {
        Some(object) => {
            object.insert(
                "torch_dtype".to_string(),
                serde_json::Value::String(torch_dtype_name(dtype).to_string()),
            );
        }
        None => return Err(Error::merge("config.json is not a JSON object")),
    }

    fs::create_dir_all(dir)?;
    let path = dir.join(CONFIG_FILE);
    fs::write(&path, serde_json::to_string_pretty(&config)?)?;
    Ok(path)
}

/// Copies files into `dir`, keeping their file names.
pub fn copy_files(files: &[PathBuf], dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let mut copied = Vec::with_capacity(files.len());
    for file in files {
        let name = file
            .file_name()
            .ok_or_else(|| Error::internal(format!("{} has no file name", file.display())))?;
        let target = dir.join(name);
        fs::copy(file, &target)?;
        copied.push(target);
    }

    Ok(copied)
}
