//! Local persistence of the user's personal API key.
//!
//! The file is a JSON object holding one string under `userApiKey`. A missing
//! file or blank value simply means no personal key.
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{AppError, AppResult};

pub const CREDENTIAL_KEY: &str = "userApiKey";

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CredentialStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> AppResult<Map<String, Value>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Map::new()),
            Ok(content) => match serde_json::from_str::<Value>(&content)? {
                Value::Object(map) => Ok(map),
                _ => Err(AppError::Credential(format!("{} is not a JSON object", self.path.display()))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_map(&self, map: &Map<String, Value>) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(map)?;
        fs::write(&self.path, content).await?;
        Ok(())
    }

    pub async fn load(&self) -> AppResult<Option<String>> {
        let map = self.read_map().await?;
        Ok(map
            .get(CREDENTIAL_KEY)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string))
    }

    pub async fn save(&self, api_key: &str) -> AppResult<()> {
        let key = api_key.trim();
        if key.is_empty() {
            return Err(AppError::Credential("API key must not be empty".to_string()));
        }
        let mut map = self.read_map().await?;
        map.insert(CREDENTIAL_KEY.to_string(), Value::String(key.to_string()));
        self.write_map(&map).await?;
        tracing::info!(path = %self.path.display(), "Saved personal API key");
        Ok(())
    }

    pub async fn clear(&self) -> AppResult<()> {
        let mut map = self.read_map().await?;
        if map.remove(CREDENTIAL_KEY).is_some() {
            self.write_map(&map).await?;
            tracing::info!(path = %self.path.display(), "Cleared personal API key");
        }
        Ok(())
    }
}

/// Show only the edges of a key.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}
