use super::types::{ErrorResponse, GenerateRequest, GenerateResponse, GeneratedText};
use crate::engine::{InferenceEngine, SamplingParams};
use axum::{extract::State, http::StatusCode, response::Json};
use std::{sync::Arc, time::Instant};
use tracing::{error, info};
use uuid::Uuid;

/// Built once at startup and shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn InferenceEngine>,
    pub sampling: SamplingParams,
}

pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, (StatusCode, Json<ErrorResponse>)> {
    let request_id = Uuid::new_v4();
    let start = Instant::now();
    info!(%request_id, "Received generate request with {} prompts", request.prompts.len());

    match state.engine.generate(&request.prompts, &state.sampling).await {
        Ok(completions) => {
            let responses: Vec<GeneratedText> = completions.into_iter().map(Into::into).collect();
            info!(
                %request_id,
                "Generated {} responses in {:.2}s",
                responses.len(),
                start.elapsed().as_secs_f64()
            );
            Ok(Json(GenerateResponse { responses }))
        }
        Err(e) => {
            error!(%request_id, "Generation failed: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Generation error: {}", e),
                }),
            ))
        }
    }
}
