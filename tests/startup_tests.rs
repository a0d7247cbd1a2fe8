use candle_core::{DType, Device};
use lora_serve::{Error, startup};
use pretty_assertions::assert_eq;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

mod common;

use common::test_utils::{
    MERGED_Q_PROJ, Q_PROJ, create_temp_dir, create_test_config, misshapen_adapter_tensors,
    write_adapter, write_adapter_with, write_base_model,
};

#[tokio::test]
async fn test_merge_and_save_from_local_directories() {
    let root = create_temp_dir();
    let base_dir = root.path().join("base");
    let adapter_dir = root.path().join("adapter");
    write_base_model(&base_dir);
    write_adapter(&adapter_dir);

    let config = create_test_config(
        base_dir.to_str().unwrap(),
        adapter_dir.to_str().unwrap(),
        root.path(),
    );

    let artifact = startup::merge_and_save(&config).await.unwrap();

    assert_eq!(artifact.dir, config.model.output_dir);
    assert_eq!(artifact.dtype, DType::F32);
    assert!(artifact.device.is_cpu());

    let merged = candle_core::safetensors::load(
        artifact.dir.join("model.safetensors"),
        &Device::Cpu,
    )
    .unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(
        merged[Q_PROJ].to_vec2::<f32>().unwrap(),
        MERGED_Q_PROJ.iter().map(|row| row.to_vec()).collect::<Vec<_>>()
    );
    assert_eq!(
        merged["model.embed_tokens.weight"].to_vec2::<f32>().unwrap(),
        vec![vec![0.5, 0.5], vec![1.0, 1.0], vec![1.5, 1.5]]
    );

    let saved_config: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(artifact.dir.join("config.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(saved_config["torch_dtype"], "float32");
    assert_eq!(saved_config["model_type"], "mistral");

    for file in ["tokenizer.json", "tokenizer_config.json", "generation_config.json"] {
        assert!(artifact.dir.join(file).is_file(), "{} not copied", file);
    }
    assert!(!artifact.dir.join("special_tokens_map.json").exists());
    assert!(!artifact.dir.join("adapter_config.json").exists());
}

#[tokio::test]
async fn test_rerun_rebuilds_artifact() {
    let root = create_temp_dir();
    let base_dir = root.path().join("base");
    let adapter_dir = root.path().join("adapter");
    write_base_model(&base_dir);
    write_adapter(&adapter_dir);

    let config = create_test_config(
        base_dir.to_str().unwrap(),
        adapter_dir.to_str().unwrap(),
        root.path(),
    );

    startup::merge_and_save(&config).await.unwrap();
    let artifact = startup::merge_and_save(&config).await.unwrap();

    let merged = candle_core::safetensors::load(
        artifact.dir.join("model.safetensors"),
        &Device::Cpu,
    )
    .unwrap();
    // merged once from the base, not stacked on the previous output
    assert_eq!(merged[Q_PROJ].to_vec2::<f32>().unwrap()[0], vec![3.0, 0.0]);
}

#[tokio::test]
async fn test_unreachable_model_fails_before_anything_is_written() {
    let root = create_temp_dir();
    let mut config = create_test_config("org/does-not-exist", "org/adapter", root.path());
    // Nothing listens on the discard port
    config.hub.endpoint = "http://127.0.0.1:9".to_string();

    let result = startup::start_engine(&config).await;

    assert!(matches!(result, Err(Error::Network(_))));
    assert!(!config.model.output_dir.exists());
}

#[tokio::test]
async fn test_missing_adapter_aborts_startup() {
    let root = create_temp_dir();
    let base_dir = root.path().join("base");
    let adapter_dir = root.path().join("empty-adapter");
    write_base_model(&base_dir);
    std::fs::create_dir_all(&adapter_dir).unwrap();

    let config = create_test_config(
        base_dir.to_str().unwrap(),
        adapter_dir.to_str().unwrap(),
        root.path(),
    );

    let result = startup::merge_and_save(&config).await;

    assert!(matches!(result, Err(Error::FileNotFound { file, .. }) if file == "adapter_config.json"));
    assert!(!config.model.output_dir.exists());
}

#[tokio::test]
async fn test_incompatible_adapter_aborts_startup() {
    let root = create_temp_dir();
    let base_dir = root.path().join("base");
    let adapter_dir = root.path().join("adapter");
    write_base_model(&base_dir);
    let (lora_a, lora_b) = misshapen_adapter_tensors();
    write_adapter_with(&adapter_dir, lora_a, lora_b);

    let config = create_test_config(
        base_dir.to_str().unwrap(),
        adapter_dir.to_str().unwrap(),
        root.path(),
    );

    let result = startup::merge_and_save(&config).await;

    assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    assert!(!config.model.output_dir.exists());
}

#[tokio::test]
async fn test_merge_and_save_from_hub() {
    let fixtures = create_temp_dir();
    let base_dir = fixtures.path().join("base");
    let adapter_dir = fixtures.path().join("adapter");
    write_base_model(&base_dir);
    write_adapter(&adapter_dir);

    let server = MockServer::start().await;
    let served = [
        ("tiny/base", &base_dir, "config.json"),
        ("tiny/base", &base_dir, "generation_config.json"),
        ("tiny/base", &base_dir, "model.safetensors"),
        ("tiny/base", &base_dir, "tokenizer.json"),
        ("tiny/base", &base_dir, "tokenizer_config.json"),
        ("tiny/adapter", &adapter_dir, "adapter_config.json"),
        ("tiny/adapter", &adapter_dir, "adapter_model.safetensors"),
    ];
    for (repo, dir, file) in served {
        Mock::given(method("GET"))
            .and(path(format!("/{}/resolve/main/{}", repo, file)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(std::fs::read(dir.join(file)).unwrap()))
            .expect(1)
            .mount(&server)
            .await;
    }
    // Everything else (index, optional tokenizer files) is absent
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let root = create_temp_dir();
    let mut config = create_test_config("tiny/base", "tiny/adapter", root.path());
    config.hub.endpoint = server.uri();

    let artifact = startup::merge_and_save(&config).await.unwrap();

    let merged = candle_core::safetensors::load(
        artifact.dir.join("model.safetensors"),
        &Device::Cpu,
    )
    .unwrap();
    assert_eq!(
        merged[Q_PROJ].to_vec2::<f32>().unwrap(),
        MERGED_Q_PROJ.iter().map(|row| row.to_vec()).collect::<Vec<_>>()
    );
    assert!(
        root.path()
            .join("hub-cache/tiny/base/main/model.safetensors")
            .is_file()
    );
    assert!(artifact.dir.join("tokenizer.json").is_file());
}

#[tokio::test]
async fn test_output_dir_must_not_be_the_base_directory() {
    let root = create_temp_dir();
    let base_dir = root.path().join("base");
    let adapter_dir = root.path().join("adapter");
    write_base_model(&base_dir);
    write_adapter(&adapter_dir);

    let mut config = create_test_config(
        base_dir.to_str().unwrap(),
        adapter_dir.to_str().unwrap(),
        root.path(),
    );
    config.model.output_dir = root.path().join("base/../base");

    let result = startup::merge_and_save(&config).await;

    assert!(matches!(result, Err(Error::Config(_))));
    let base = candle_core::safetensors::load(base_dir.join("model.safetensors"), &Device::Cpu)
        .unwrap();
    assert_eq!(base[Q_PROJ].to_vec2::<f32>().unwrap()[0], vec![1.0, 0.0]);
}
