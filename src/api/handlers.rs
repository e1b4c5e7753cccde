//! Axum request handlers for the HTTP API.
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::routes::AppState;
use crate::error::{AppError, AppResult};
use crate::gemini::client::QualityTier;
use crate::image::ImageArtifact;
use crate::prompt::library::StyleTemplate;
use crate::rate::RateStatus;
use crate::runner::RunSnapshot;
use crate::task::TaskDescriptor;

pub const USER_KEY_HEADER: &str = "x-user-api-key";

#[derive(Debug, Deserialize)]
pub struct PromptSource {
    pub prompt: Option<String>,
    pub template: Option<String>,
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub images: Vec<String>,
    #[serde(flatten)]
    pub source: PromptSource,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub sets: Vec<Vec<String>>,
    #[serde(flatten)]
    pub source: PromptSource,
}

#[derive(Debug, Deserialize)]
pub struct VariationRequest {
    pub images: Vec<String>,
    pub count: usize,
    pub workers: Option<usize>,
    #[serde(flatten)]
    pub source: PromptSource,
}

#[derive(Debug, Deserialize)]
pub struct EnhanceRequest {
    pub image: String,
    pub tier: QualityTier,
}

#[derive(Debug, Deserialize)]
pub struct ValidateKeyRequest {
    pub api_key: String,
}

pub async fn root() -> &'static str {
    "Stylizer"
}

pub async fn rate_status(State(state): State<Arc<AppState>>) -> Json<RateStatus> {
    Json(state.orchestrator.rate_status())
}

pub async fn list_templates(State(state): State<Arc<AppState>>) -> Json<Vec<StyleTemplate>> {
    let templates = state.templates.read().await;
    Json(templates.list().cloned().collect())
}

pub async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> AppResult<Json<StyleTemplate>> {
    let templates = state.templates.read().await;
    let template = templates.get(&name)?.clone();
    Ok(Json(template))
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<GenerateRequest>,
) -> AppResult<Json<Value>> {
    let prompt = resolve_prompt(&state, &payload.source).await?;
    let images = decode_images(&payload.images)?;
    let credential = user_key(&headers);
    let image = state
        .orchestrator
        .generate_single(&images, &prompt, credential.as_deref())
        .await?;
    Ok(Json(image_body(&image)))
}

pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<BatchRequest>,
) -> AppResult<Json<Value>> {
    let prompt = resolve_prompt(&state, &payload.source).await?;
    let mut tasks = Vec::with_capacity(payload.sets.len());
    for (index, set) in payload.sets.iter().enumerate() {
        tasks.push(TaskDescriptor::new(index as u32 + 1, decode_images(set)?, prompt.clone()));
    }
    let total = tasks.len();
    let handle = state.orchestrator.spawn_batch(tasks, user_key(&headers))?;
    let run_id = state.track_run(handle.events).await;
    tracing::info!(%run_id, total, "Accepted batch run");
    Ok(Json(json!({ "run_id": run_id, "total": total })))
}

pub async fn create_variations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<VariationRequest>,
) -> AppResult<Json<Value>> {
    let prompt = resolve_prompt(&state, &payload.source).await?;
    let images = decode_images(&payload.images)?;
    let handle = state.orchestrator.spawn_variations(
        images,
        prompt,
        payload.count,
        payload.workers,
        user_key(&headers),
    )?;
    let run_id = state.track_run(handle.events).await;
    tracing::info!(%run_id, count = payload.count, "Accepted variation run");
    Ok(Json(json!({ "run_id": run_id, "total": payload.count })))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RunSnapshot>> {
    let runs = state.runs.read().await;
    let snapshot = runs.get(&id).cloned().ok_or(AppError::RunNotFound(id))?;
    Ok(Json(snapshot))
}

pub async fn delete_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    state.runs.write().await.remove(&id).ok_or(AppError::RunNotFound(id))?;
    tracing::info!(run_id = %id, "Deleted run");
    Ok(Json(json!({ "deleted": id })))
}

pub async fn enhance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<EnhanceRequest>,
) -> AppResult<Json<Value>> {
    let image = ImageArtifact::from_data_uri(&payload.image)?;
    let credential = user_key(&headers);
    let enhanced = state
        .orchestrator
        .enhance(&image, payload.tier, credential.as_deref())
        .await?;
    Ok(Json(image_body(&enhanced)))
}

pub async fn validate_key(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateKeyRequest>,
) -> AppResult<Json<Value>> {
    let valid = state.orchestrator.validate_key(&payload.api_key).await?;
    Ok(Json(json!({ "valid": valid })))
}

// Helpers

fn user_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

fn decode_images(uris: &[String]) -> AppResult<Vec<ImageArtifact>> {
    uris.iter().map(|uri| ImageArtifact::from_data_uri(uri)).collect()
}

async fn resolve_prompt(state: &AppState, source: &PromptSource) -> AppResult<String> {
    match (&source.prompt, &source.template) {
        (Some(prompt), None) => Ok(prompt.clone()),
        (None, Some(name)) => {
            let templates = state.templates.read().await;
            templates.render(name, &source.inputs)
        }
        _ => Err(AppError::InvalidRequest("Provide exactly one of 'prompt' or 'template'".to_string())),
    }
}

fn image_body(image: &ImageArtifact) -> Value {
    json!({ "mime_type": image.mime_type, "image": image.to_data_uri() })
}
