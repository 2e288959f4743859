use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::request::{SummaryRequest, SummaryResponse};

pub mod gemini;
pub mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

pub const SUPPORTED_PROVIDERS: &[&str] = &["gemini", "openai"];

/// The external summarization call. One request, one response or a
/// classified error; retry policy belongs to the caller.
#[async_trait]
pub trait SummarizationService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryResponse, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: String,
    pub model: Option<String>,
    pub api_endpoint: Option<String>,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn from_config(config: &ServiceConfig, api_key: String) -> Self {
        Self {
            api_key,
            model: config.model.clone(),
            api_endpoint: config.api_endpoint.clone(),
            timeout: Duration::from_secs(config.timeout_seconds.max(1)),
        }
    }
}

pub fn build_service(
    provider_name: &str,
    settings: ProviderSettings,
) -> Result<Arc<dyn SummarizationService>> {
    if settings.api_key.trim().is_empty() {
        bail!("An API key is required for the {} provider", provider_name);
    }

    let service: Arc<dyn SummarizationService> = match provider_name {
        "gemini" => Arc::new(GeminiProvider::new(settings).context("Failed to set up Gemini")?),
        "openai" => Arc::new(OpenAiProvider::new(settings).context("Failed to set up OpenAI")?),
        _ => bail!(
            "Unknown summarization provider '{}'. Supported providers: {}",
            provider_name,
            SUPPORTED_PROVIDERS.join(", ")
        ),
    };

    info!("Using {} for summarization", service.name());
    Ok(service)
}

/// Shared client construction so both providers honour the same timeout.
fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Turn a finished HTTP exchange into either the body or a classified error.
async fn read_body(provider: &str, response: reqwest::Response) -> Result<String, ServiceError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ServiceError::from_transport(provider, &e))?;

    if !status.is_success() {
        let message = error_message(&body).unwrap_or_else(|| truncate(&body, 300));
        return Err(ServiceError::from_status(provider, status.as_u16(), message));
    }
    Ok(body)
}

/// Both services report failures as `{"error": {"message": ...}}`.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > max_chars {
        let cut: String = trimmed.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(key: &str) -> ProviderSettings {
        ProviderSettings {
            api_key: key.to_string(),
            model: None,
            api_endpoint: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_factory_known_providers() {
        assert_eq!(build_service("gemini", settings("k")).unwrap().name(), "gemini");
        assert_eq!(build_service("openai", settings("k")).unwrap().name(), "openai");
    }

    #[test]
    fn test_factory_rejects_unknown_or_keyless() {
        let err = build_service("nope", settings("k")).err().unwrap();
        assert!(err.to_string().contains("Unknown summarization provider"));
        assert!(build_service("gemini", settings("  ")).is_err());
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid"}}"#;
        assert_eq!(error_message(body).as_deref(), Some("API key not valid"));
        assert_eq!(error_message("<html>oops</html>"), None);
    }
}
