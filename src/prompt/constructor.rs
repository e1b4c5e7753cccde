//! Prompt templating with simple `{{placeholder}}` substitution.
//!
//! Given a style template's prompt text and an `inputs` map, replaces every
//! `{{ key }}` occurrence with `inputs[key]`, returning the final prompt.
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

#[derive(Debug, Default, Clone, Copy)]
pub struct PromptConstructor;

impl PromptConstructor {
    pub fn new() -> Self {
        PromptConstructor
    }

    /// Construct a prompt by substituting placeholders inside `template`
    /// with corresponding values from `inputs`.
    pub fn render(&self, template: &str, inputs: &Map<String, Value>) -> AppResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                AppError::PromptConstruction(format!("Unclosed placeholder in template: {}", template))
            })?;
            let key = after[..end].trim();
            let replacement = inputs
                .get(key)
                .ok_or_else(|| AppError::PromptConstruction(format!("Missing input for placeholder: {}", key)))?;
            match replacement {
                Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);

        if out.trim().is_empty() {
            return Err(AppError::PromptConstruction("Constructed prompt is empty".to_string()));
        }
        Ok(out)
    }
}
