use crate::engine::Completion;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompts: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub responses: Vec<GeneratedText>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub generated_text: String,
    pub num_tokens: usize,
}

impl From<Completion> for GeneratedText {
    fn from(completion: Completion) -> Self {
        Self {
            num_tokens: completion.num_tokens(),
            generated_text: completion.text,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
