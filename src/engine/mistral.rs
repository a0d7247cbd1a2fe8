use super::{
    Completion, InferenceEngine, SamplingParams,
    generation::{CausalLm, StopCriteria, generate_tokens},
};
use crate::{
    Error, Result,
    config::EngineConfig,
    weights::{CONFIG_FILE, TOKENIZER_FILE, local_weight_files},
};
use async_trait::async_trait;
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::mistral;
use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Instant,
};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

struct Inner {
    model: Mutex<Box<dyn CausalLm>>,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_id: Option<u32>,
    max_model_len: usize,
}

/// Mistral-architecture engine running on candle. One model instance is
/// shared by all callers; prompts are decoded one after another.
#[derive(Clone)]
pub struct CandleEngine {
    inner: Arc<Inner>,
}

impl CandleEngine {
    /// Loads the model and tokenizer from a merged artifact directory.
    pub fn load(dir: &Path, device: Device, dtype: DType, engine: &EngineConfig) -> Result<Self> {
        let raw_config: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join(CONFIG_FILE))?)?;
        let config: mistral::Config = serde_json::from_value(raw_config.clone())?;

        let tokenizer =
            Tokenizer::from_file(dir.join(TOKENIZER_FILE)).map_err(Error::tokenizer)?;
        let eos_token_id = eos_token_id(&raw_config, &tokenizer);
        if eos_token_id.is_none() {
            warn!("No end-of-sequence token found, generation stops only on length");
        }

        let mut max_model_len = engine.max_model_len;
        if max_model_len > config.max_position_embeddings {
            warn!(
                "max_model_len {} exceeds the model's {} positions, clamping",
                max_model_len, config.max_position_embeddings
            );
            max_model_len = config.max_position_embeddings;
        }

        let files = local_weight_files(dir)?;
        let start = Instant::now();
        // SAFETY: the merged artifact is written once before loading and never
        // modified while the process runs.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files, dtype, &device)? };
        let model = mistral::Model::new(&config, vb)?;

        info!(
            "Engine loaded from {} in {:.2}s ({} layers, device {:?}, dtype {:?}, max_model_len {})",
            dir.display(),
            start.elapsed().as_secs_f64(),
            config.num_hidden_layers,
            device,
            dtype,
            max_model_len
        );

        Ok(Self::new(
            Box::new(model),
            tokenizer,
            device,
            eos_token_id,
            max_model_len,
        ))
    }

    pub fn new(
        model: Box<dyn CausalLm>,
        tokenizer: Tokenizer,
        device: Device,
        eos_token_id: Option<u32>,
        max_model_len: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                model: Mutex::new(model),
                tokenizer,
                device,
                eos_token_id,
                max_model_len,
            }),
        }
    }
}

fn eos_token_id(config: &serde_json::Value, tokenizer: &Tokenizer) -> Option<u32> {
    let from_config = match &config["eos_token_id"] {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::Array(ids) => ids.first().and_then(serde_json::Value::as_u64),
        _ => None,
    };
    from_config
        .map(|id| id as u32)
        .or_else(|| tokenizer.token_to_id("</s>"))
}

impl Inner {
    fn run(&self, prompts: &[String], params: &SamplingParams) -> Result<Vec<Completion>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| Error::engine("Model lock poisoned by an earlier failure"))?;

        let stop = StopCriteria {
            eos_token_id: self.eos_token_id,
            max_tokens: params.max_tokens,
            max_model_len: self.max_model_len,
        };

        let mut completions = Vec::with_capacity(prompts.len());
        for (index, prompt) in prompts.iter().enumerate() {
            let encoding = self
                .tokenizer
                .encode(prompt.as_str(), true)
                .map_err(Error::tokenizer)?;

            let mut processor = params.logits_processor(index);
            let token_ids = generate_tokens(
                &mut **model,
                encoding.get_ids(),
                &mut processor,
                &stop,
                &self.device,
            )?;
            let text = self
                .tokenizer
                .decode(&token_ids, true)
                .map_err(Error::tokenizer)?;

            debug!(
                "Prompt {} ({} tokens) produced {} tokens",
                index,
                encoding.len(),
                token_ids.len()
            );
            completions.push(Completion { text, token_ids });
        }

        Ok(completions)
    }
}

#[async_trait]
impl InferenceEngine for CandleEngine {
    async fn generate(&self, prompts: &[String], params: &SamplingParams) -> Result<Vec<Completion>> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }

        let inner = Arc::clone(&self.inner);
        let prompts = prompts.to_vec();
        let params = params.clone();

        tokio::task::spawn_blocking(move || inner.run(&prompts, &params))
            .await
            .map_err(|e| Error::engine(format!("Generation task failed: {}", e)))?
    }
}
