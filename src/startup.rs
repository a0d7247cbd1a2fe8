//! One-time startup: load base and adapter, merge, persist, start the engine.
//!
//! Every step must finish before the next one begins and any failure aborts
//! startup. Nothing is retried and a partially written artifact is left as is.

use crate::{
    Error, Result,
    config::Config,
    engine::CandleEngine,
    hub::{HubClient, ModelSource, Repo},
    weights::{
        TOKENIZER_EXTRA_FILES, TOKENIZER_FILE, copy_files, load_adapter, load_base_model,
        merge_lora_weights, resolve_device, resolve_dtype, save_config, save_weights,
    },
};
use candle_core::{DType, Device};
use std::{
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::info;

/// The merged model directory together with the precision it was saved in.
#[derive(Debug, Clone)]
pub struct MergedArtifact {
    pub dir: PathBuf,
    pub device: Device,
    pub dtype: DType,
}

/// Saving clears old weight files from the output directory, so it must not
/// be one of the local input directories.
fn check_output_dir(output_dir: &Path, sources: &[&ModelSource]) -> Result<()> {
    let Ok(output) = output_dir.canonicalize() else {
        return Ok(());
    };
    for source in sources {
        if let ModelSource::Local(dir) = source {
            if dir.canonicalize().is_ok_and(|dir| dir == output) {
                return Err(Error::config(format!(
                    "model.output_dir {} is also the input directory {}",
                    output_dir.display(),
                    dir.display()
                )));
            }
        }
    }
    Ok(())
}

/// Loads the base model and adapter, merges them and writes the merged
/// weights and tokenizer to `model.output_dir`.
pub async fn merge_and_save(config: &Config) -> Result<MergedArtifact> {
    let start = Instant::now();
    let device = resolve_device(&config.model.device)?;
    let dtype = resolve_dtype(&config.model.dtype, &device)?;
    info!("Using device {:?} with dtype {:?}", device, dtype);

    let hub = HubClient::new(&config.hub)?;
    let base_repo = Repo::new(
        hub.clone(),
        ModelSource::parse(&config.model.base, &config.model.revision),
    );
    let adapter_repo = Repo::new(
        hub,
        ModelSource::parse(&config.model.adapter, &config.model.adapter_revision),
    );
    let output_dir = &config.model.output_dir;
    check_output_dir(output_dir, &[base_repo.source(), adapter_repo.source()])?;

    info!("Loading base model from {}", base_repo.source());
    let mut base = load_base_model(&base_repo, &device, dtype).await?;

    info!("Loading LoRA adapter from {}", adapter_repo.source());
    let adapter = load_adapter(&adapter_repo, &device).await?;

    info!("Merging adapter into base model");
    let report = merge_lora_weights(&mut base.tensors, &adapter)?;
    info!(
        "Merged {} LoRA modules, replaced {} tensors",
        report.merged, report.replaced
    );
    drop(adapter);

    info!("Saving merged model to {}", output_dir.display());
    save_weights(&base.tensors, output_dir, config.model.max_shard_bytes)?;
    save_config(&base.config, dtype, output_dir)?;
    if let Some(generation_config) = &base.generation_config {
        copy_files(std::slice::from_ref(generation_config), output_dir)?;
    }
    drop(base);

    info!("Saving tokenizer");
    let mut tokenizer_files = vec![base_repo.get(TOKENIZER_FILE).await?];
    for file in TOKENIZER_EXTRA_FILES {
        if let Some(path) = base_repo.get_optional(file).await? {
            tokenizer_files.push(path);
        }
    }
    copy_files(&tokenizer_files, output_dir)?;

    info!(
        "Merged model saved to {} in {:.1}s",
        output_dir.display(),
        start.elapsed().as_secs_f64()
    );

    Ok(MergedArtifact {
        dir: output_dir.clone(),
        device,
        dtype,
    })
}

/// Runs the full startup sequence and returns a ready engine.
pub async fn start_engine(config: &Config) -> Result<CandleEngine> {
    let artifact = merge_and_save(config).await?;

    info!("Initializing inference engine");
    CandleEngine::load(&artifact.dir, artifact.device, artifact.dtype, &config.engine)
}
