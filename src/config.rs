//! Env-driven configuration for the server, the CLI and the library.
//!
//! Values are read from the process environment; `dotenv` is loaded on demand
//! by the binaries. Defaults are provided for convenience during development.
use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenv;

#[derive(Debug, Clone)]
pub struct Config {
    pub proxy_url: String,
    pub model: String,
    pub shared_key_available: bool,
    pub templates_dir: String,
    pub credential_file: String,
    pub dispatch_delay_ms: u64,
    pub variation_workers: usize,
    pub request_timeout_secs: u64,
    pub api_host: String,
    pub api_port: String,
}

impl Config {
    pub fn dotenv_load() {
        dotenv::dotenv().ok();
    }

    pub fn new() -> Result<Self, env::VarError> {
        Ok(Config {
            proxy_url: env::var("PROXY_URL").unwrap_or_else(|_| "http://localhost:3000/api/proxy".to_string()),
            model: env::var("IMAGE_MODEL").unwrap_or_else(|_| "gemini-2.5-flash-image-preview".to_string()),
            shared_key_available: parse_or("SHARED_KEY_AVAILABLE", true),
            templates_dir: env::var("TEMPLATES_DIR").unwrap_or_else(|_| "./templates".to_string()),
            credential_file: env::var("CREDENTIAL_FILE").unwrap_or_else(|_| "./.stylizer/credential.json".to_string()),
            dispatch_delay_ms: parse_or("DISPATCH_DELAY_MS", 1100),
            variation_workers: parse_or("VARIATION_WORKERS", 1),
            request_timeout_secs: parse_or("REQUEST_TIMEOUT_SECS", 120),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            api_port: env::var("API_PORT").unwrap_or_else(|_| "8190".to_string()),
        })
    }

    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn log_summary(&self) {
        tracing::info!(
            proxy_url = %self.proxy_url,
            model = %self.model,
            shared_key_available = self.shared_key_available,
            templates_dir = %self.templates_dir,
            dispatch_delay_ms = self.dispatch_delay_ms,
            variation_workers = self.variation_workers,
            "Loaded configuration"
        );
    }
}

fn parse_or<T: FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {} '{}', falling back to {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
