//! Maps raw generation failures onto the closed `ErrorKind` set.
//!
//! Rules are checked in a fixed priority order on the lowercased failure text:
//! credential problems, quota exhaustion, safety blocks, model refusals,
//! missing credential, connectivity, then an embedded JSON error payload.
use serde_json::Value;

use crate::error::{ClassifiedError, ErrorKind, GenerationError};
use crate::gemini::payload::error_message_from_value;

const INVALID_CREDENTIAL_MARKERS: &[&str] = &[
    "api key not valid",
    "api_key_invalid",
    "invalid api key",
    "unauthenticated",
    "permission_denied",
    "status 401",
    "status 403",
];

const QUOTA_MARKERS: &[&str] = &[
    "quota",
    "resource_exhausted",
    "resource has been exhausted",
    "rate limit",
    "too many requests",
    "status 429",
];

const SAFETY_MARKERS: &[&str] = &["safety", "prohibited_content", "blocklist"];

const NO_CREDENTIAL_MARKERS: &[&str] = &["no api key", "api key is missing", "missing api key"];

const NETWORK_MARKERS: &[&str] = &[
    "network error",
    "failed to fetch",
    "error sending request",
    "connection",
    "timed out",
    "dns error",
];

const REFUSAL_PREFIX: &str = "model refusal:";

const REFUSAL_PHRASES: &[&str] = &[
    "i can't",
    "i cannot",
    "i can not",
    "i'm unable",
    "i am unable",
    "i'm not able",
    "i am not able",
    "i won't",
    "unable to create",
    "not able to help",
];

const CANNED_REFUSAL: &str =
    "The model declined to transform this photo. Try a different photo or another style.";

/// Classify a client failure. Pure: the same error and credential presence
/// always produce the same pair.
pub fn classify(error: &GenerationError, has_user_credential: bool) -> ClassifiedError {
    classify_message(&error.to_string(), has_user_credential)
}

pub fn classify_message(raw: &str, has_user_credential: bool) -> ClassifiedError {
    let lowered = raw.to_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

    if contains_any(INVALID_CREDENTIAL_MARKERS) {
        let message = if has_user_credential {
            "Your API key was rejected. Check that it is correct and enabled, then save it again."
        } else {
            "The shared API key was rejected. Add your own API key in settings to continue."
        };
        return ClassifiedError::new(ErrorKind::InvalidCredential, message);
    }

    if contains_any(QUOTA_MARKERS) {
        let message = if has_user_credential {
            "Your API key has hit its rate limit or quota. Wait about a minute, or check your plan and billing."
        } else {
            "The shared API key is out of quota right now. Add your own API key in settings, or try again later."
        };
        return ClassifiedError::new(ErrorKind::QuotaExhausted, message);
    }

    if contains_any(SAFETY_MARKERS) {
        return ClassifiedError::new(
            ErrorKind::SafetyBlocked,
            "The request was blocked by content safety filters. Try a different photo or style.",
        );
    }

    // ASCII lowering keeps byte offsets aligned with `raw`.
    if let Some(start) = raw.to_ascii_lowercase().find(REFUSAL_PREFIX) {
        let model_text = raw[start + REFUSAL_PREFIX.len()..].trim();
        let model_lowered = model_text.to_lowercase();
        if model_text.is_empty() || REFUSAL_PHRASES.iter().any(|p| model_lowered.contains(p)) {
            return ClassifiedError::new(ErrorKind::ModelRefusal, CANNED_REFUSAL);
        }
        return ClassifiedError::new(ErrorKind::ModelRefusal, format!("The model replied: {}", model_text));
    }

    if contains_any(NO_CREDENTIAL_MARKERS) {
        return ClassifiedError::new(
            ErrorKind::NoCredential,
            "No API key is available. Add your own API key in settings.",
        );
    }

    if contains_any(NETWORK_MARKERS) {
        return ClassifiedError::new(
            ErrorKind::NetworkError,
            "Could not reach the image service. Check your connection and try again.",
        );
    }

    if let Some(message) = embedded_error_message(raw) {
        return ClassifiedError::new(ErrorKind::Unknown, message);
    }
    ClassifiedError::new(ErrorKind::Unknown, format!("Something went wrong: {}", raw.trim()))
}

fn embedded_error_message(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&raw[start..=end]).ok()?;
    error_message_from_value(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(status: u16, message: &str) -> GenerationError {
        GenerationError::Upstream { status, message: message.to_string() }
    }

    #[test]
    fn credential_errors_win_over_everything() {
        let err = upstream(400, "API key not valid. Please pass a valid API key. (quota project unset)");
        assert_eq!(classify(&err, true).kind, ErrorKind::InvalidCredential);
        assert_eq!(classify(&upstream(403, "forbidden"), false).kind, ErrorKind::InvalidCredential);
    }

    #[test]
    fn quota_message_depends_on_credential_source() {
        let err = upstream(429, "Resource has been exhausted (e.g. check quota).");
        let own = classify(&err, true);
        let shared = classify(&err, false);
        assert_eq!(own.kind, ErrorKind::QuotaExhausted);
        assert_eq!(shared.kind, ErrorKind::QuotaExhausted);
        assert_ne!(own.message, shared.message);
        assert!(shared.message.contains("shared"));
    }

    #[test]
    fn quota_is_never_reported_as_network() {
        let err = GenerationError::Network("connection reset after 429 Too Many Requests".to_string());
        assert_eq!(classify(&err, false).kind, ErrorKind::QuotaExhausted);
    }

    #[test]
    fn safety_and_refusals() {
        let blocked = GenerationError::SafetyBlocked("IMAGE_SAFETY".to_string());
        assert_eq!(classify(&blocked, false).kind, ErrorKind::SafetyBlocked);

        let polite = GenerationError::ModelRefusal("Sorry, I can't help with editing this image.".to_string());
        let classified = classify(&polite, false);
        assert_eq!(classified.kind, ErrorKind::ModelRefusal);
        assert_eq!(classified.message, CANNED_REFUSAL);

        let chatty = GenerationError::ModelRefusal("Here is a description of the scene instead.".to_string());
        let classified = classify(&chatty, false);
        assert_eq!(classified.kind, ErrorKind::ModelRefusal);
        assert!(classified.message.contains("Here is a description of the scene instead."));
    }

    #[test]
    fn missing_credential_and_network() {
        assert_eq!(classify(&GenerationError::NoCredential, false).kind, ErrorKind::NoCredential);
        let offline = GenerationError::Network("error sending request for url".to_string());
        assert_eq!(classify(&offline, true).kind, ErrorKind::NetworkError);
    }

    #[test]
    fn embedded_payload_or_raw_fallback() {
        let embedded = classify_message(r#"proxy said {"error":{"message":"Model is overloaded"}}"#, false);
        assert_eq!(embedded, ClassifiedError::new(ErrorKind::Unknown, "Model is overloaded"));

        let raw = classify(&GenerationError::InvalidResponse("expected value at line 1".to_string()), false);
        assert_eq!(raw.kind, ErrorKind::Unknown);
        assert!(raw.message.contains("expected value at line 1"));
    }

    #[test]
    fn classification_is_pure() {
        let err = upstream(500, "internal {\"error\":\"boom\"}");
        assert_eq!(classify(&err, true), classify(&err, true));
        assert_eq!(classify(&err, false), classify(&err, false));
    }
}
