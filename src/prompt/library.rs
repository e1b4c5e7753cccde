//! Named style templates loaded from `<templates_dir>/*.json`.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

use crate::error::{AppError, AppResult};
use crate::prompt::constructor::PromptConstructor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleTemplate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub prompt: String,
}

#[derive(Debug, Default, Clone)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, StyleTemplate>,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` file in `dir`. A missing directory yields an empty library;
    /// unreadable files are skipped with a warning.
    pub async fn load(dir: &str) -> AppResult<Self> {
        let mut library = TemplateLibrary::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Templates directory '{}' not found", dir);
                return Ok(library);
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_template(&path).await {
                Ok(template) => library.insert(template),
                Err(e) => tracing::warn!("Skipping template {}: {}", path.display(), e),
            }
        }
        tracing::info!(count = library.templates.len(), "Loaded style templates from {}", dir);
        Ok(library)
    }

    pub fn insert(&mut self, template: StyleTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> AppResult<&StyleTemplate> {
        self.templates
            .get(name)
            .ok_or_else(|| AppError::TemplateNotFound(name.to_string()))
    }

    pub fn list(&self) -> impl Iterator<Item = &StyleTemplate> {
        self.templates.values()
    }

    /// Final prompt for `name` with `inputs` substituted.
    pub fn render(&self, name: &str, inputs: &Map<String, Value>) -> AppResult<String> {
        let template = self.get(name)?;
        PromptConstructor::new().render(&template.prompt, inputs)
    }
}

async fn read_template(path: &Path) -> AppResult<StyleTemplate> {
    let content = fs::read_to_string(path).await?;
    let template: StyleTemplate = serde_json::from_str(&content)?;
    if template.name.trim().is_empty() || template.prompt.trim().is_empty() {
        return Err(AppError::PromptConstruction("template needs a name and a prompt".to_string()));
    }
    Ok(template)
}
