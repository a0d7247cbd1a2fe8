mod generation;
mod mistral;
mod sampling;

pub use generation::{CausalLm, StopCriteria, generate_tokens};
pub use mistral::CandleEngine;
pub use sampling::SamplingParams;

use crate::Result;
use async_trait::async_trait;

/// Output for one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub token_ids: Vec<u32>,
}

impl Completion {
    pub fn num_tokens(&self) -> usize {
        self.token_ids.len()
    }
}

/// Turns a batch of prompts into completions, positionally aligned with the
/// input.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn generate(&self, prompts: &[String], params: &SamplingParams) -> Result<Vec<Completion>>;
}
