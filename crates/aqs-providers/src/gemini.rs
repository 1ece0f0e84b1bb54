//! Google Gemini API provider implementation.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use aqs_core::metrics::{Pricing, TokenUsage};
use aqs_core::traits::{GenerateRequest, GenerateResponse, LlmProvider, ModelInfo};

use crate::error::{check_status, decode_error, http_client, send_error};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Gemini `generateContent` provider.
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: &str, base_url: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: http_client(DEFAULT_TIMEOUT_SECS)?,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Default)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
    /// Set on thought-summary parts, which are not part of the answer.
    #[serde(default, skip_serializing_if = "is_false")]
    thought: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: GeminiUsage,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: u64,
    #[serde(default)]
    cached_content_token_count: u64,
}

#[derive(Deserialize)]
struct GeminiError {
    error: GeminiErrorBody,
}

#[derive(Deserialize)]
struct GeminiErrorBody {
    message: String,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<GeminiError>(body)
        .ok()
        .map(|e| e.error.message)
}

fn text_part(text: &str) -> GeminiPart {
    GeminiPart {
        text: text.to_string(),
        thought: false,
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let start = Instant::now();

        let body = GeminiRequest {
            system_instruction: request.system_prompt.as_deref().map(|s| GeminiContent {
                role: None,
                parts: vec![text_part(s)],
            }),
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![text_part(&request.prompt)],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: request.json_output.then_some("application/json"),
            },
        };

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, request.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(e, DEFAULT_TIMEOUT_SECS))?;

        let response = check_status(response, &request.model, error_message).await?;
        let api_response: GeminiResponse = response.json().await.map_err(decode_error)?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let content = match api_response.candidates.first() {
            Some(candidate) => {
                if let Some(reason) = candidate
                    .finish_reason
                    .as_deref()
                    .filter(|r| *r != "STOP")
                {
                    warn!(finish_reason = reason, "gemini response did not finish normally");
                }
                candidate
                    .content
                    .parts
                    .iter()
                    .filter(|p| !p.thought)
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            }
            None => {
                warn!("gemini returned no candidates");
                String::new()
            }
        };

        let usage = api_response.usage_metadata;
        Ok(GenerateResponse {
            content,
            model: api_response
                .model_version
                .unwrap_or_else(|| request.model.clone()),
            token_usage: TokenUsage {
                input_tokens: usage.prompt_token_count,
                output_tokens: usage.candidates_token_count,
                reasoning_tokens: usage.thoughts_token_count,
                cached_tokens: usage.cached_content_token_count,
            },
            latency_ms,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        [
            ("gemini-2.0-flash", "Gemini 2.0 Flash"),
            ("gemini-2.5-flash", "Gemini 2.5 Flash"),
            ("gemini-3-flash-preview", "Gemini 3 Flash (preview)"),
            ("gemini-3-pro-preview", "Gemini 3 Pro (preview)"),
        ]
        .into_iter()
        .map(|(id, name)| ModelInfo {
            id: id.into(),
            name: name.into(),
            provider: "gemini".into(),
            context_window: 1_048_576,
            pricing: Pricing::for_model(id),
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqs_core::error::ProviderError;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(model: &str) -> GenerateRequest {
        GenerateRequest {
            model: model.into(),
            prompt: "Evaluate the following assessment".into(),
            system_prompt: Some("You are an assessment reviewer.".into()),
            max_tokens: 8192,
            temperature: 0.1,
            json_output: true,
        }
    }

    #[tokio::test]
    async fn successful_generation() {
        let server = MockServer::start().await;

        let response_body = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "weighing the questions", "thought": true},
                    {"text": "{\"difficulty_scores\": "},
                    {"text": "{}}"}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 1200,
                "candidatesTokenCount": 300,
                "thoughtsTokenCount": 450,
                "cachedContentTokenCount": 100,
                "totalTokenCount": 1950
            },
            "modelVersion": "gemini-2.5-flash-001"
        });

        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "systemInstruction": {"parts": [{"text": "You are an assessment reviewer."}]},
                "generationConfig": {"responseMimeType": "application/json", "maxOutputTokens": 8192}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&response_body))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new("test-key", Some(server.uri())).unwrap();
        let response = provider.generate(&request("gemini-2.5-flash")).await.unwrap();

        assert_eq!(response.content, "{\"difficulty_scores\": {}}");
        assert_eq!(response.model, "gemini-2.5-flash-001");
        assert_eq!(response.token_usage.input_tokens, 1200);
        assert_eq!(response.token_usage.output_tokens, 300);
        assert_eq!(response.token_usage.reasoning_tokens, 450);
        assert_eq!(response.token_usage.cached_tokens, 100);
    }

    #[tokio::test]
    async fn no_candidates_is_empty_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": {"blockReason": "SAFETY"},
                "usageMetadata": {"promptTokenCount": 40}
            })))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new("key", Some(server.uri())).unwrap();
        let response = provider.generate(&request("gemini-2.0-flash")).await.unwrap();
        assert!(response.content.is_empty());
        assert_eq!(response.model, "gemini-2.0-flash");
        assert_eq!(response.token_usage.input_tokens, 40);
    }

    #[tokio::test]
    async fn rate_limiting() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new("key", Some(server.uri())).unwrap();
        let err = provider.generate(&request("gemini-2.0-flash")).await.unwrap_err();
        let err = err.downcast::<ProviderError>().unwrap();
        assert_eq!(err.retry_after_ms(), Some(7000));
    }

    #[tokio::test]
    async fn authentication_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}
            })))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new("bad", Some(server.uri())).unwrap();
        let err = provider.generate(&request("gemini-2.0-flash")).await.unwrap_err();
        let err = err.downcast::<ProviderError>().unwrap();
        assert!(matches!(&err, ProviderError::AuthenticationFailed(m) if m == "API key not valid"));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new("key", Some(server.uri())).unwrap();
        let err = provider.generate(&request("gemini-2.0-flash")).await.unwrap_err();
        let err = err.downcast::<ProviderError>().unwrap();
        assert!(matches!(err, ProviderError::ApiError { status: 503, .. }));
        assert!(!err.is_permanent());
    }

    #[test]
    fn model_list_carries_pricing() {
        let provider = GeminiProvider::new("key", None).unwrap();
        let models = provider.available_models();
        let pro = models.iter().find(|m| m.id == "gemini-3-pro-preview").unwrap();
        assert_eq!(pro.pricing, Pricing::new(2.00, 12.00));
    }
}
