use super::adapter::{LoraAdapter, LoraLayer};
use crate::{Error, Result};
use candle_core::{DType, Tensor};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReport {
    pub merged: usize,
    pub replaced: usize,
}

/// Folds every LoRA pair into its base weight, `W' = W + scale * (B @ A)`,
/// and swaps in fully trained replacement tensors.
///
/// The delta is accumulated in f32 and the result keeps the base dtype.
/// All shapes and ranks are checked before the first tensor is written, so
/// a failed merge leaves `tensors` untouched. Each module is then merged and
/// written back on its own, keeping at most one extra weight alive.
pub fn merge_lora_weights(
    tensors: &mut HashMap<String, Tensor>,
    adapter: &LoraAdapter,
) -> Result<MergeReport> {
    for (module, layer) in &adapter.layers {
        check_layer(tensors, adapter, module, layer)?;
    }
    for (name, replacement) in &adapter.replacements {
        let base = base_tensor(tensors, name)?;
        if replacement.dims() != base.dims() {
            return Err(Error::ShapeMismatch {
                tensor: name.clone(),
                expected: base.dims().to_vec(),
                actual: replacement.dims().to_vec(),
            });
        }
    }

    for (module, layer) in &adapter.layers {
        let name = format!("{}.weight", module);
        let base = base_tensor(tensors, &name)?;
        let (rank, _) = layer.a.dims2()?;
        let scale = adapter.config.scaling(module, rank);

        debug!("Merging {} (rank {}, scale {})", module, rank, scale);
        let mut delta = layer
            .b
            .to_dtype(DType::F32)?
            .matmul(&layer.a.to_dtype(DType::F32)?)?;
        if adapter.config.fan_in_fan_out {
            delta = delta.t()?;
        }
        let delta = delta.to_device(base.device())?.affine(scale, 0.0)?;
        let merged = base.to_dtype(DType::F32)?.add(&delta)?.to_dtype(base.dtype())?;
        tensors.insert(name, merged);
    }

    for (name, replacement) in &adapter.replacements {
        let base = base_tensor(tensors, name)?;
        debug!("Replacing {}", name);
        let replacement = replacement
            .to_device(base.device())?
            .to_dtype(base.dtype())?;
        tensors.insert(name.clone(), replacement);
    }

    Ok(MergeReport {
        merged: adapter.layers.len(),
        replaced: adapter.replacements.len(),
    })
}

fn base_tensor<'a>(tensors: &'a HashMap<String, Tensor>, name: &str) -> Result<&'a Tensor> {
    tensors.get(name).ok_or_else(|| Error::TensorNotFound {
        module: name.trim_end_matches(".weight").to_string(),
    })
}

/// Validates one LoRA pair against its base weight without allocating.
fn check_layer(
    tensors: &HashMap<String, Tensor>,
    adapter: &LoraAdapter,
    module: &str,
    layer: &LoraLayer,
) -> Result<()> {
    let name = format!("{}.weight", module);
    let base = base_tensor(tensors, &name)?;

    let (rank, in_features) = layer.a.dims2()?;
    let (out_features, b_rank) = layer.b.dims2()?;
    if b_rank != rank {
        return Err(Error::ShapeMismatch {
            tensor: format!("{}.lora_B.weight", module),
            expected: vec![out_features, rank],
            actual: layer.b.dims().to_vec(),
        });
    }
    let configured_rank = adapter.config.rank_for(module);
    if configured_rank != rank {
        return Err(Error::merge(format!(
            "{} has rank {} but the adapter config declares {}",
            module, rank, configured_rank
        )));
    }

    let delta_dims = if adapter.config.fan_in_fan_out {
        [in_features, out_features]
    } else {
        [out_features, in_features]
    };
    if base.dims() != delta_dims.as_slice() {
        return Err(Error::ShapeMismatch {
            tensor: name,
            expected: base.dims().to_vec(),
            actual: delta_dims.to_vec(),
        });
    }
    Ok(())
}
