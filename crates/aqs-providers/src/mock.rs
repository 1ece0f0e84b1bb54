//! Mock provider for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use aqs_core::error::ProviderError;
use aqs_core::metrics::{Pricing, TokenUsage};
use aqs_core::traits::{GenerateRequest, GenerateResponse, LlmProvider, ModelInfo};

/// A well-formed combined analysis, returned when nothing else is configured.
pub const SAMPLE_RESPONSE: &str = r#"{
  "difficulty_level": "Intermediate",
  "difficulty_rationale": "Mostly recall with some application.",
  "difficulty_scores": {"complexity_score": 6, "language_difficulty_score": 5, "cognitive_effort_score": 6, "course_alignment_score": 8},
  "blooms_scores": {"remember": 30, "understand": 30, "apply": 20, "analyze": 20, "evaluate": 0, "create": 0},
  "blooms_distribution_summary": "Weighted toward lower levels.",
  "course_fit_details": {"course_fit_score": 75, "course_fit_status": "Good Fit", "difficulty_appropriateness_score": 85},
  "quality_tier_reasoning": "Solid coverage."
}"#;

/// A mock backend for exercising the pipeline without network calls.
///
/// Queued failures are returned first, one per call. After that the response
/// is picked by prompt substring, falling back to the default.
pub struct MockProvider {
    /// Map of prompt substring → response.
    responses: HashMap<String, String>,
    default_response: String,
    failures: Mutex<VecDeque<ProviderError>>,
    call_count: AtomicU32,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl MockProvider {
    /// Create a mock with prompt→response mappings.
    pub fn new(responses: HashMap<String, String>) -> Self {
        Self {
            responses,
            default_response: SAMPLE_RESPONSE.to_string(),
            failures: Mutex::new(VecDeque::new()),
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn with_fixed_response(response: &str) -> Self {
        Self {
            default_response: response.to_string(),
            ..Self::new(HashMap::new())
        }
    }

    /// Fail the next calls with `errors`, in order.
    pub fn with_failures(self, errors: Vec<ProviderError>) -> Self {
        Self {
            failures: Mutex::new(errors.into()),
            ..self
        }
    }

    /// Get the number of calls made to this provider.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Get the last request made to this provider.
    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(request.clone());

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(err) = failure {
            return Err(err.into());
        }

        let content = self
            .responses
            .iter()
            .find(|(key, _)| request.prompt.contains(key.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default_response.clone());

        // Rough estimate
        let prompt_chars = request.prompt.len()
            + request.system_prompt.as_ref().map_or(0, |s| s.len());
        Ok(GenerateResponse {
            token_usage: TokenUsage {
                input_tokens: (prompt_chars / 4) as u64,
                output_tokens: (content.len() / 4) as u64,
                ..Default::default()
            },
            content,
            model: request.model.clone(),
            latency_ms: 1,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "mock-model".into(),
            name: "Mock Model".into(),
            provider: "mock".into(),
            context_window: 100_000,
            pricing: Pricing::new(0.0, 0.0),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqs_core::parser::parse_response;

    fn request(prompt: &str) -> GenerateRequest {
        GenerateRequest {
            model: "mock-model".into(),
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: 100,
            temperature: 0.0,
            json_output: true,
        }
    }

    #[tokio::test]
    async fn fixed_response() {
        let provider = MockProvider::with_fixed_response("not json");
        let response = provider.generate(&request("anything")).await.unwrap();
        assert_eq!(response.content, "not json");
        assert_eq!(response.token_usage.input_tokens, 2);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(provider.last_request().unwrap().prompt, "anything");
    }

    #[tokio::test]
    async fn prompt_matching() {
        let mut responses = HashMap::new();
        responses.insert("Final Exam".to_string(), "final".to_string());
        responses.insert("Quiz".to_string(), "quiz".to_string());
        let provider = MockProvider::new(responses);

        let resp = provider.generate(&request("Name: Final Exam")).await.unwrap();
        assert_eq!(resp.content, "final");
        let resp = provider.generate(&request("Name: Weekly Quiz")).await.unwrap();
        assert_eq!(resp.content, "quiz");
        let resp = provider.generate(&request("Name: Lab")).await.unwrap();
        assert_eq!(resp.content, SAMPLE_RESPONSE);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn failures_come_first() {
        let provider = MockProvider::default().with_failures(vec![
            ProviderError::Timeout(1),
            ProviderError::RateLimited { retry_after_ms: 10 },
        ]);

        let err = provider.generate(&request("x")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::Timeout(1))
        ));
        assert!(provider.generate(&request("x")).await.is_err());
        assert!(provider.generate(&request("x")).await.is_ok());
        assert_eq!(provider.call_count(), 3);
    }

    #[test]
    fn sample_response_parses() {
        let parsed = parse_response(SAMPLE_RESPONSE, true).unwrap();
        assert_eq!(parsed.blooms.remember, 30.0);
    }
}
