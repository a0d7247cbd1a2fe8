use crate::{Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_transformers::{generation::LogitsProcessor, models::mistral};

/// A decoder that keeps its own KV cache between forward calls.
pub trait CausalLm: Send {
    /// Logits for the last position, shaped `(1, 1, vocab)`.
    fn forward(&mut self, input_ids: &Tensor, seqlen_offset: usize) -> candle_core::Result<Tensor>;

    fn clear_kv_cache(&mut self);
}

impl CausalLm for mistral::Model {
    fn forward(&mut self, input_ids: &Tensor, seqlen_offset: usize) -> candle_core::Result<Tensor> {
        mistral::Model::forward(self, input_ids, seqlen_offset)
    }

    fn clear_kv_cache(&mut self) {
        mistral::Model::clear_kv_cache(self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StopCriteria {
    pub eos_token_id: Option<u32>,
    pub max_tokens: usize,
    pub max_model_len: usize,
}

/// Decodes one sequence. The prompt is fed once, then one token per step
/// until EOS (kept in the output), `max_tokens`, or `max_model_len`.
pub fn generate_tokens(
    model: &mut dyn CausalLm,
    prompt: &[u32],
    processor: &mut LogitsProcessor,
    stop: &StopCriteria,
    device: &Device,
) -> Result<Vec<u32>> {
    if prompt.is_empty() {
        return Err(Error::engine("Prompt encodes to zero tokens"));
    }
    if prompt.len() >= stop.max_model_len {
        return Err(Error::engine(format!(
            "Prompt of {} tokens leaves no room within max_model_len {}",
            prompt.len(),
            stop.max_model_len
        )));
    }

    model.clear_kv_cache();

    let budget = stop.max_tokens.min(stop.max_model_len - prompt.len());
    let mut tokens = prompt.to_vec();
    let mut generated = Vec::with_capacity(budget);
    let mut offset = 0;

    while generated.len() < budget {
        let input = Tensor::new(&tokens[offset..], device)?.unsqueeze(0)?;
        let logits = model.forward(&input, offset)?;
        let logits = logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?;
        offset = tokens.len();

        let next = processor.sample(&logits)?;
        tokens.push(next);
        generated.push(next);

        if stop.eos_token_id == Some(next) {
            break;
        }
    }

    Ok(generated)
}
