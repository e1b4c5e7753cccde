//! Request bodies for the generation proxy and normalization of its replies.
//!
//! The proxy takes `{ endpoint, payload, userApiKey? }` and forwards `payload`
//! to the vendor. Replies are either the raw vendor success payload or an error
//! body in one of the two envelopes handled by `extract_error_message`.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::error::GenerationError;
use crate::image::ImageArtifact;

const SAFETY_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "IMAGE_SAFETY", "BLOCKLIST", "SPII"];

pub fn generate_endpoint(model: &str) -> String {
    format!("{}:generateContent", model_path(model))
}

pub fn count_tokens_endpoint(model: &str) -> String {
    format!("{}:countTokens", model_path(model))
}

fn model_path(model: &str) -> String {
    let trimmed = model.trim();
    if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{}", trimmed)
    }
}

fn inline_part(image: &ImageArtifact) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": image.to_base64(),
        }
    })
}

/// Vendor payload for an image-conditioned generation: image parts in order,
/// then the prompt text.
pub fn build_generate_payload(images: &[ImageArtifact], prompt: &str, image_size: Option<&str>) -> Value {
    let mut parts: Vec<Value> = images.iter().map(inline_part).collect();
    parts.push(json!({ "text": prompt }));

    let mut generation_config = Map::new();
    generation_config.insert("responseModalities".to_string(), json!(["IMAGE", "TEXT"]));
    if let Some(size) = image_size {
        generation_config.insert("imageConfig".to_string(), json!({ "imageSize": size }));
    }
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": Value::Object(generation_config),
    })
}

pub fn build_validation_payload() -> Value {
    json!({ "contents": [{ "role": "user", "parts": [{ "text": "ping" }] }] })
}

/// Wrap a vendor payload in the proxy envelope. `userApiKey` is only present
/// when a personal credential is in use.
pub fn proxy_envelope(endpoint: &str, payload: Value, user_api_key: Option<&str>) -> Value {
    let mut body = Map::new();
    body.insert("endpoint".to_string(), Value::String(endpoint.to_string()));
    body.insert("payload".to_string(), payload);
    if let Some(key) = user_api_key {
        body.insert("userApiKey".to_string(), Value::String(key.to_string()));
    }
    Value::Object(body)
}

/// Pull a readable message out of an error body: the proxy's `{ error: string }`,
/// the vendor's `{ error: { message } }`, else the raw text, else a generic line.
pub fn extract_error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = error_message_from_value(&value) {
            return message;
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    format!("request failed with status {}", status)
}

pub(crate) fn error_message_from_value(value: &Value) -> Option<String> {
    let error = value.get("error");
    let found = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| error.and_then(Value::as_str))
        .or_else(|| value.get("message").and_then(Value::as_str));
    found.map(str::trim).filter(|m| !m.is_empty()).map(str::to_string)
}

/// Normalize a 2xx vendor payload into one image or a typed failure.
pub fn extract_image(response: &Value) -> Result<ImageArtifact, GenerationError> {
    if let Some(reason) = response
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Err(GenerationError::SafetyBlocked(reason.to_string()));
    }

    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut texts = Vec::new();
    let mut safety_reason = None;
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
            if let Some(inline) = inline {
                let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .map_err(|e| GenerationError::InvalidResponse(format!("image base64 decode failed: {}", e)))?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                return Ok(ImageArtifact::new(mime_type, bytes));
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    texts.push(text.trim().to_string());
                }
            }
        }
        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            if SAFETY_FINISH_REASONS.contains(&reason) {
                safety_reason = Some(reason.to_string());
            }
        }
    }

    if let Some(reason) = safety_reason {
        return Err(GenerationError::SafetyBlocked(reason));
    }
    if texts.is_empty() {
        return Err(GenerationError::ModelRefusal("the model returned no image".to_string()));
    }
    Err(GenerationError::ModelRefusal(texts.join("\n")))
}
