//! Stylizer library
//!
//! Modules:
//! - `api`: Axum HTTP handlers and router setup used by the server binary.
//! - `gemini`: Proxy client, request payloads and error classification for the image model.
//! - `runner`: Batch, variation and enhancement runners plus their event stream.
//! - `rate`: Sliding-window request accounting and quota cooldown.
//! - `orchestrator`: Admission checks and run spawning on top of the runners.
//! - `prompt`: Style templates with `{{placeholder}}` replacement.
//! - `credential`: Persisted personal API key.
//! - `config`: Env-driven configuration loader.
//! - `error`: Error types and the `AppResult` alias.
//!
//! Re-exports are provided for common types: `Config`, `ProxyClient`,
//! `Orchestrator`, `RateGovernor`, `PromptConstructor` and `TemplateLibrary`.
pub mod api;
pub mod config;
pub mod credential;
pub mod error;
pub mod gemini;
pub mod image;
pub mod orchestrator;
pub mod prompt;
pub mod rate;
pub mod runner;
pub mod task;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use gemini::client::ProxyClient;
pub use orchestrator::Orchestrator;
pub use prompt::constructor::PromptConstructor;
pub use prompt::library::TemplateLibrary;
pub use rate::RateGovernor;
