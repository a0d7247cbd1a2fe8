use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use candle_core::{Device, Tensor};
use lora_serve::{
    config::{Config, HubConfig, ModelConfig},
    engine::{InferenceEngine, SamplingParams},
    server::{self, AppState},
};
use serde_json::Value;
use std::{collections::HashMap, path::Path, sync::Arc};
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

pub const Q_PROJ: &str = "model.layers.0.self_attn.q_proj.weight";

pub const BASE_CONFIG_JSON: &str = r#"{
  "architectures": ["MistralForCausalLM"],
  "model_type": "mistral",
  "torch_dtype": "bfloat16",
  "eos_token_id": 2
}"#;

/// Rank-1 adapter on q_proj with scale 2: B @ A = [[1, 0], [1, 0]].
pub const ADAPTER_CONFIG_JSON: &str = r#"{
  "peft_type": "LORA",
  "r": 1,
  "lora_alpha": 2,
  "target_modules": ["q_proj"],
  "base_model_name_or_path": "tiny/base"
}"#;

/// q_proj of the fixture base merged with the fixture adapter.
pub const MERGED_Q_PROJ: [[f32; 2]; 2] = [[3.0, 0.0], [2.0, 1.0]];

/// Create a temporary directory for test files
pub fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

fn matrix(rows: &[&[f32]]) -> Tensor {
    let rows: Vec<Tensor> = rows
        .iter()
        .map(|row| Tensor::new(*row, &Device::Cpu).unwrap())
        .collect();
    Tensor::stack(&rows, 0).unwrap()
}

/// Writes a tiny base model: identity q_proj plus untouched embeddings.
pub fn write_base_model(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    let tensors = HashMap::from([
        (Q_PROJ.to_string(), matrix(&[&[1.0, 0.0], &[0.0, 1.0]])),
        (
            "model.embed_tokens.weight".to_string(),
            matrix(&[&[0.5, 0.5], &[1.0, 1.0], &[1.5, 1.5]]),
        ),
    ]);
    candle_core::safetensors::save(&tensors, dir.join("model.safetensors")).unwrap();
    std::fs::write(dir.join("config.json"), BASE_CONFIG_JSON).unwrap();
    std::fs::write(dir.join("generation_config.json"), r#"{"max_new_tokens": 16}"#).unwrap();
    std::fs::write(dir.join("tokenizer.json"), r#"{"version": "1.0"}"#).unwrap();
    std::fs::write(dir.join("tokenizer_config.json"), r#"{"eos_token": "</s>"}"#).unwrap();
}

pub fn write_adapter(dir: &Path) {
    write_adapter_with(dir, matrix(&[&[1.0, 0.0]]), matrix(&[&[1.0], &[1.0]]));
}

pub fn write_adapter_with(dir: &Path, lora_a: Tensor, lora_b: Tensor) {
    std::fs::create_dir_all(dir).unwrap();
    let tensors = HashMap::from([
        (
            "base_model.model.model.layers.0.self_attn.q_proj.lora_A.weight".to_string(),
            lora_a,
        ),
        (
            "base_model.model.model.layers.0.self_attn.q_proj.lora_B.weight".to_string(),
            lora_b,
        ),
    ]);
    candle_core::safetensors::save(&tensors, dir.join("adapter_model.safetensors")).unwrap();
    std::fs::write(dir.join("adapter_config.json"), ADAPTER_CONFIG_JSON).unwrap();
}

pub fn misshapen_adapter_tensors() -> (Tensor, Tensor) {
    (matrix(&[&[1.0, 0.0, 0.0]]), matrix(&[&[1.0], &[1.0]]))
}

/// Create a test configuration that runs on CPU in f32 with a private cache
pub fn create_test_config(base: &str, adapter: &str, root: &Path) -> Config {
    Config {
        model: ModelConfig {
            base: base.to_string(),
            adapter: adapter.to_string(),
            output_dir: root.join("merged_model"),
            dtype: "f32".to_string(),
            device: "cpu".to_string(),
            ..ModelConfig::default()
        },
        hub: HubConfig {
            cache_dir: root.join("hub-cache"),
            ..HubConfig::default()
        },
        ..Config::default()
    }
}

pub fn create_test_app(engine: impl InferenceEngine + 'static) -> Router {
    server::router(AppState {
        engine: Arc::new(engine),
        sampling: SamplingParams::default(),
    })
}

/// POSTs a JSON body to `/generate` and returns status plus parsed body.
pub async fn post_generate(app: Router, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/generate")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, value)
}
