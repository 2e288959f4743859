use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{http_client, read_body, ProviderSettings, SummarizationService};
use crate::error::ServiceError;
use crate::request::{SummaryRequest, SummaryResponse};

const PROVIDER: &str = "openai";
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    refusal: Option<String>,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(settings: ProviderSettings) -> reqwest::Result<Self> {
        let base_url = settings
            .api_endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = settings.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());

        info!(
            "Initialized OpenAI provider with base URL: {} (model {})",
            base_url, model
        );

        Ok(Self {
            client: http_client(settings.timeout)?,
            api_key: settings.api_key,
            base_url,
            model,
        })
    }
}

fn request_body<'a>(model: &'a str, request: &'a SummaryRequest) -> ChatRequest<'a> {
    let mut content = vec![ContentPart::Text {
        text: &request.prompt_text,
    }];
    content.extend(request.media.iter().map(|m| ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: format!("data:{};base64,{}", m.mime_type, m.base64_payload),
        },
    }));

    ChatRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content,
        }],
    }
}

fn parse_response(body: &str) -> Result<SummaryResponse, ServiceError> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
        ServiceError::non_retryable(PROVIDER, None, format!("malformed response: {e}"))
    })?;

    let choice = response.choices.into_iter().next().ok_or_else(|| {
        ServiceError::non_retryable(PROVIDER, None, "response contained no choices")
    })?;

    if let Some(refusal) = choice.message.refusal {
        return Err(ServiceError::non_retryable(
            PROVIDER,
            None,
            format!("model refused: {refusal}"),
        ));
    }

    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(SummaryResponse { summary_text: text }),
        _ => Err(ServiceError::non_retryable(
            PROVIDER,
            None,
            format!(
                "response contained no text (finish reason {})",
                choice.finish_reason.as_deref().unwrap_or("unknown")
            ),
        )),
    }
}

#[async_trait]
impl SummarizationService for OpenAiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryResponse, ServiceError> {
        debug!(
            "Sending {} prompt chars and {} media to OpenAI",
            request.prompt_text.len(),
            request.media.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request_body(&self.model, request))
            .send()
            .await
            .map_err(|e| ServiceError::from_transport(PROVIDER, &e))?;

        let body = read_body(PROVIDER, response).await?;
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{MediaPart, VerbosityHint};

    #[test]
    fn test_request_body_uses_data_urls() {
        let request = SummaryRequest {
            prompt_text: "summarize".to_string(),
            verbosity_hint: VerbosityHint::new(0.5),
            media: vec![MediaPart {
                mime_type: "image/png".to_string(),
                base64_payload: "QUJD".to_string(),
            }],
        };

        let json = serde_json::to_value(request_body("gpt-4o-mini", &request)).unwrap();
        let content = &json["messages"][0]["content"];
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,QUJD");
    }

    #[test]
    fn test_parse_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"All good."},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_response(body).unwrap().summary_text, "All good.");
    }

    #[test]
    fn test_refusal_and_empty_are_not_retryable() {
        let refusal = r#"{"choices":[{"message":{"content":null,"refusal":"no"},"finish_reason":"stop"}]}"#;
        assert!(!parse_response(refusal).unwrap_err().is_retryable());

        let empty = r#"{"choices":[]}"#;
        let err = parse_response(empty).unwrap_err();
        assert!(err.message.contains("no choices"));
    }
}
