use async_trait::async_trait;
use lora_serve::{
    Error, Result,
    engine::{Completion, InferenceEngine, SamplingParams},
};
use std::sync::{Arc, Mutex};

/// How the stub turns a prompt into a completion.
#[derive(Debug, Clone)]
enum Behavior {
    /// Same completion for every prompt.
    Fixed(Completion),
    /// Echoes the prompt with one token id per whitespace-separated word.
    Echo,
}

/// Stub inference engine for testing
#[derive(Debug, Clone)]
pub struct StubEngine {
    behavior: Behavior,
    pub calls: Arc<Mutex<Vec<(Vec<String>, SamplingParams)>>>,
    pub error: Option<String>,
}

impl StubEngine {
    pub fn fixed(text: &str, token_ids: Vec<u32>) -> Self {
        Self {
            behavior: Behavior::Fixed(Completion {
                text: text.to_string(),
                token_ids,
            }),
            calls: Arc::new(Mutex::new(Vec::new())),
            error: None,
        }
    }

    pub fn echo() -> Self {
        Self {
            behavior: Behavior::Echo,
            calls: Arc::new(Mutex::new(Vec::new())),
            error: None,
        }
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn get_calls(&self) -> Vec<(Vec<String>, SamplingParams)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceEngine for StubEngine {
    async fn generate(&self, prompts: &[String], params: &SamplingParams) -> Result<Vec<Completion>> {
        self.calls
            .lock()
            .unwrap()
            .push((prompts.to_vec(), params.clone()));

        if let Some(ref error) = self.error {
            return Err(Error::engine(error.clone()));
        }

        Ok(prompts
            .iter()
            .map(|prompt| match &self.behavior {
                Behavior::Fixed(completion) => completion.clone(),
                Behavior::Echo => Completion {
                    text: format!("echo: {}", prompt),
                    token_ids: (0..prompt.split_whitespace().count() as u32).collect(),
                },
            })
            .collect())
    }
}
