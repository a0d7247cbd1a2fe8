use super::{CONFIG_FILE, GENERATION_CONFIG_FILE, WEIGHTS_FILE, WEIGHTS_INDEX_FILE, shard_files};
use crate::{Error, Result, hub::Repo};
use candle_core::{DType, Device, Tensor};
use std::{collections::HashMap, path::PathBuf};
use tracing::{debug, info};

/// Base model weights resident on the target device, plus the files that
/// travel with them into the merged artifact.
pub struct BaseModel {
    pub tensors: HashMap<String, Tensor>,
    pub config: serde_json::Value,
    pub generation_config: Option<PathBuf>,
}

impl BaseModel {
    pub fn num_parameters(&self) -> usize {
        self.tensors.values().map(Tensor::elem_count).sum()
    }
}

pub async fn load_base_model(repo: &Repo, device: &Device, dtype: DType) -> Result<BaseModel> {
    let config_path = repo.get(CONFIG_FILE).await?;
    let config: serde_json::Value = serde_json::from_str(&tokio::fs::read_to_string(&config_path).await?)?;
    let generation_config = repo.get_optional(GENERATION_CONFIG_FILE).await?;

    let files = resolve_weight_files(repo).await?;
    info!("Loading {} weight file(s) from {}", files.len(), repo.source());

    let mut tensors = HashMap::new();
    for file in &files {
        debug!("Reading {}", file.display());
        for (name, tensor) in candle_core::safetensors::load(file, device)? {
            let tensor = if tensor.dtype().is_float() {
                tensor.to_dtype(dtype)?
            } else {
                tensor
            };
            if tensors.insert(name.clone(), tensor).is_some() {
                return Err(Error::merge(format!(
                    "Tensor {} appears in more than one weight file",
                    name
                )));
            }
        }
    }

    let model = BaseModel {
        tensors,
        config,
        generation_config,
    };
    info!(
        "Loaded {} tensors ({} parameters) as {:?}",
        model.tensors.len(),
        model.num_parameters(),
        dtype
    );

    Ok(model)
}

async fn resolve_weight_files(repo: &Repo) -> Result<Vec<PathBuf>> {
    match repo.get_optional(WEIGHTS_INDEX_FILE).await? {
        Some(index) => {
            let mut files = Vec::new();
            for shard in shard_files(&index)? {
                files.push(repo.get(&shard).await?);
            }
            Ok(files)
        }
        None => Ok(vec![repo.get(WEIGHTS_FILE).await?]),
    }
}
