use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hub error: {0}")]
    Hub(String),

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("File not found in {repo}: {file}")]
    FileNotFound { repo: String, file: String },

    #[error("Base tensor not found for adapter module: {module}")]
    TensorNotFound { module: String },

    #[error("Shape mismatch for {tensor}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        tensor: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn hub(msg: impl Into<String>) -> Self {
        Self::Hub(msg.into())
    }

    pub fn merge(msg: impl Into<String>) -> Self {
        Self::Merge(msg.into())
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    pub fn tokenizer(msg: impl std::fmt::Display) -> Self {
        Self::Tokenizer(msg.to_string())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ShapeMismatch {
            tensor: "model.layers.0.self_attn.q_proj.weight".to_string(),
            expected: vec![4, 4],
            actual: vec![4, 2],
        };
        assert_eq!(
            err.to_string(),
            "Shape mismatch for model.layers.0.self_attn.q_proj.weight: expected [4, 4], got [4, 2]"
        );

        let err = Error::tokenizer("unknown token");
        assert_eq!(err.to_string(), "Tokenizer error: unknown token");
    }
}
