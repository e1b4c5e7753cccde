//! Error types shared across the crate.
//!
//! - `GenerationError`: raw failure of a single upstream operation. Its display
//!   text is what the classifier inspects.
//! - `ClassifiedError`: classifier output, a closed `ErrorKind` plus a message
//!   fit to show a user.
//! - `AppError`: crate-level error used by the orchestrator, stores, templates
//!   and the HTTP API.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("no API key available: add a personal key or configure the shared key")]
    NoCredential,
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("request blocked by safety filters ({0})")]
    SafetyBlocked(String),
    #[error("model refusal: {0}")]
    ModelRefusal(String),
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoCredential,
    InvalidCredential,
    QuotaExhausted,
    SafetyBlocked,
    ModelRefusal,
    NetworkError,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ClassifiedError { kind, message: message.into() }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Prompt construction error: {0}")]
    PromptConstruction(String),
    #[error("Template not found: {0}")]
    TemplateNotFound(String),
    #[error("Run not found: {0}")]
    RunNotFound(uuid::Uuid),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Rate limit cooldown active, retry in {seconds}s")]
    CoolingDown { seconds: u32 },
    #[error(transparent)]
    Generation(#[from] ClassifiedError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::CoolingDown { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::InvalidRequest(_) | AppError::PromptConstruction(_) => StatusCode::BAD_REQUEST,
            AppError::TemplateNotFound(_) | AppError::RunNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Generation(e) if e.kind == ErrorKind::QuotaExhausted => StatusCode::TOO_MANY_REQUESTS,
            AppError::Generation(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Generation(e) => json!({ "error": e.message, "kind": e.kind }),
            AppError::CoolingDown { seconds } => json!({ "error": self.to_string(), "retry_after": seconds }),
            other => json!({ "error": other.to_string() }),
        };
        if status.is_server_error() {
            tracing::error!(status = %status, "{}", self);
        }
        (status, Json(body)).into_response()
    }
}
