//! In-memory image payloads and their wire encodings.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AppError, AppResult};

/// One image: MIME type plus raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub mime_type: String,
    #[serde(with = "b64")]
    pub data: Vec<u8>,
}

impl ImageArtifact {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        ImageArtifact { mime_type: mime_type.into(), data }
    }

    /// Parse a `data:<mime>;base64,<payload>` URI.
    pub fn from_data_uri(uri: &str) -> AppResult<Self> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| AppError::InvalidRequest("image must be a data: URI".to_string()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| AppError::InvalidRequest("malformed data URI".to_string()))?;
        let mime_type = meta
            .strip_suffix(";base64")
            .ok_or_else(|| AppError::InvalidRequest("data URI must be base64 encoded".to_string()))?;
        let mime_type = if mime_type.is_empty() { "image/png" } else { mime_type };
        let data = BASE64
            .decode(payload.as_bytes())
            .map_err(|e| AppError::InvalidRequest(format!("invalid base64 image data: {}", e)))?;
        Ok(ImageArtifact::new(mime_type, data))
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    /// Read an image file, guessing the MIME type from its extension.
    pub async fn from_path(path: &Path) -> AppResult<Self> {
        let data = tokio::fs::read(path).await?;
        let mime = mime_for_path(path).unwrap_or("image/png");
        Ok(ImageArtifact::new(mime, data))
    }

    /// File extension matching the MIME type, for saving outputs.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

mod b64 {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_uri() {
        let img = ImageArtifact::from_data_uri("data:image/jpeg;base64,AAEC").expect("valid uri");
        assert_eq!(img.mime_type, "image/jpeg");
        assert_eq!(img.data, vec![0, 1, 2]);
        assert_eq!(img.to_data_uri(), "data:image/jpeg;base64,AAEC");
        assert_eq!(img.extension(), "jpg");
    }

    #[test]
    fn rejects_non_data_uri() {
        assert!(ImageArtifact::from_data_uri("https://example.com/a.png").is_err());
        assert!(ImageArtifact::from_data_uri("data:image/png,plain").is_err());
    }

    #[test]
    fn guesses_mime_from_extension() {
        assert_eq!(mime_for_path(Path::new("a/b/photo.JPEG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("photo")), None);
    }
}
