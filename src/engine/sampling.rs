use crate::config::SamplingConfig;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sampling settings applied to every prompt of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: usize,
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        SamplingConfig::default().into()
    }
}

impl From<SamplingConfig> for SamplingParams {
    fn from(config: SamplingConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            seed: config.seed,
        }
    }
}

impl SamplingParams {
    /// Temperature 0 decodes greedily; `top_p` of 1 samples the full
    /// distribution.
    pub fn sampling(&self) -> Sampling {
        if self.temperature <= 0.0 {
            Sampling::ArgMax
        } else if self.top_p >= 1.0 {
            Sampling::All {
                temperature: self.temperature,
            }
        } else {
            Sampling::TopP {
                p: self.top_p,
                temperature: self.temperature,
            }
        }
    }

    /// Processor for the `index`-th prompt of a call. A configured seed makes
    /// output reproducible; otherwise the clock seeds the stream.
    pub fn logits_processor(&self, index: usize) -> LogitsProcessor {
        let base = self.seed.unwrap_or_else(clock_seed);
        LogitsProcessor::from_sampling(base.wrapping_add(index as u64), self.sampling())
    }
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}
