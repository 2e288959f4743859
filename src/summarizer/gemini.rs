use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{http_client, read_body, ProviderSettings, SummarizationService};
use crate::error::ServiceError;
use crate::request::{SummaryRequest, SummaryResponse};

const PROVIDER: &str = "gemini";
const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(settings: ProviderSettings) -> reqwest::Result<Self> {
        let base_url = settings
            .api_endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = settings.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());

        info!(
            "Initialized Gemini provider with base URL: {} (model {})",
            base_url, model
        );

        Ok(Self {
            client: http_client(settings.timeout)?,
            api_key: settings.api_key,
            base_url,
            model,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

fn request_body(request: &SummaryRequest) -> GenerateRequest<'_> {
    let mut parts = vec![Part::Text {
        text: &request.prompt_text,
    }];
    parts.extend(request.media.iter().map(|m| Part::Inline {
        inline_data: InlineData {
            mime_type: &m.mime_type,
            data: &m.base64_payload,
        },
    }));

    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts,
        }],
    }
}

fn parse_response(body: &str) -> Result<SummaryResponse, ServiceError> {
    let response: GenerateResponse = serde_json::from_str(body).map_err(|e| {
        ServiceError::non_retryable(PROVIDER, None, format!("malformed response: {e}"))
    })?;

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ServiceError::non_retryable(
            PROVIDER,
            None,
            format!("prompt was blocked: {reason}"),
        ));
    }

    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        ServiceError::non_retryable(PROVIDER, None, "response contained no candidates")
    })?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(ServiceError::non_retryable(
            PROVIDER,
            None,
            format!("response contained no text (finish reason {reason})"),
        ));
    }

    Ok(SummaryResponse { summary_text: text })
}

#[async_trait]
impl SummarizationService for GeminiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryResponse, ServiceError> {
        debug!(
            "Sending {} prompt chars and {} media to Gemini",
            request.prompt_text.len(),
            request.media.len()
        );

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| ServiceError::from_transport(PROVIDER, &e))?;

        let body = read_body(PROVIDER, response).await?;
        parse_response(&body)
    }
}
