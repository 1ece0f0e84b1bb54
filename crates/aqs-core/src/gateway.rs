//! Model gateway: one logical scoring call per task.
//!
//! The gateway renders the prompt, calls the backend under a per-call
//! timeout, retries transient transport failures with exponential backoff,
//! and retries once with a correction instruction when the response cannot
//! be parsed. Every response received is metered, whether it parsed or not.
//!
//! Temperature defaults to a low value so repeated evaluations of unchanged
//! input are expected to be numerically stable. This is not guaranteed:
//! backends may still return different scores for identical prompts.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, ProviderError};
use crate::metrics::{LlmCallStats, TokenMetrics};
use crate::model::{AssessmentRecord, CourseContext};
use crate::parser::{ParsedAnalysis, ResponseParser};
use crate::prompt::PromptTemplates;
use crate::traits::{Backend, GenerateRequest, GenerateResponse};

/// Transport retry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Transport attempts per logical call, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub call_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            call_timeout_secs: 120,
        }
    }
}

impl RetryPolicy {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Delay before retry number `retry` (1-based), raised to the backend's hint.
    pub fn backoff(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let exp = self
            .initial_backoff_ms
            .saturating_mul(1u64 << (retry.saturating_sub(1)).min(32));
        let delay = Duration::from_millis(exp.min(self.max_backoff_ms));
        match hint {
            Some(hint) => delay.max(hint),
            None => delay,
        }
    }
}

/// Generation settings shared by every call.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub temperature: f64,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 8192,
            retry: RetryPolicy::default(),
        }
    }
}

/// Classified result of a single backend call.
#[derive(Debug)]
pub enum CallOutcome {
    Success(GenerateResponse),
    /// Worth retrying; `retry_after` is the backend's hint, if any.
    Transient {
        error: EvalError,
        retry_after: Option<Duration>,
    },
    /// Retrying will not help.
    Fatal(EvalError),
}

/// Tokens and call counts spent on one task, successful or not.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallMeter {
    pub tokens: TokenMetrics,
    pub llm_calls: LlmCallStats,
}

/// A parsed scoring response.
#[derive(Debug, Clone)]
pub struct ScoredResponse {
    pub raw: String,
    pub analysis: ParsedAnalysis,
    /// Model id reported by the backend.
    pub model: String,
    pub tokens: TokenMetrics,
    pub llm_calls: LlmCallStats,
}

/// Uniform access to scoring backends.
pub struct ModelGateway {
    templates: Arc<PromptTemplates>,
    parser: ResponseParser,
    config: GatewayConfig,
}

impl ModelGateway {
    pub fn new(templates: Arc<PromptTemplates>, parser: ResponseParser, config: GatewayConfig) -> Self {
        Self {
            templates,
            parser,
            config,
        }
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    /// One backend call under the per-call timeout.
    #[tracing::instrument(skip_all, fields(backend = %backend.descriptor.name, model = %request.model))]
    pub async fn call_once(&self, backend: &Backend, request: &GenerateRequest) -> CallOutcome {
        let name = &backend.descriptor.name;
        let timeout = self.config.retry.call_timeout();
        match tokio::time::timeout(timeout, backend.provider.generate(request)).await {
            Err(_) => CallOutcome::Transient {
                error: EvalError::BackendUnavailable {
                    backend: name.clone(),
                    attempts: 1,
                    message: format!("call timed out after {}s", timeout.as_secs()),
                },
                retry_after: None,
            },
            Ok(Ok(response)) => CallOutcome::Success(response),
            Ok(Err(err)) => classify(name, err),
        }
    }

    /// Score an assessment, discarding the meter on failure.
    pub async fn score(
        &self,
        course: &CourseContext,
        assessment: &AssessmentRecord,
        backend: &Backend,
    ) -> Result<ScoredResponse, EvalError> {
        let mut meter = CallMeter::default();
        self.score_metered(course, assessment, backend, &mut meter).await
    }

    /// Score an assessment, accumulating tokens and call counts into `meter`
    /// even when the task ends in an error.
    pub async fn score_metered(
        &self,
        course: &CourseContext,
        assessment: &AssessmentRecord,
        backend: &Backend,
        meter: &mut CallMeter,
    ) -> Result<ScoredResponse, EvalError> {
        let prompt = self.templates.render(course, assessment);
        let expect_course_fit = assessment.kind.has_course_fit();
        let mut request = GenerateRequest {
            model: backend.descriptor.model.clone(),
            prompt: prompt.user,
            system_prompt: Some(prompt.system),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            json_output: true,
        };

        let estimated_tokens = (request.prompt.len() / 4) as u32;
        if estimated_tokens > backend.descriptor.context_window {
            tracing::warn!(
                backend = %backend.descriptor.name,
                estimated_tokens,
                context_window = backend.descriptor.context_window,
                "prompt may exceed the backend's context window"
            );
        }

        let response = self.call_with_retry(backend, &request, meter).await?;
        let first_error = match self.parser.parse(&response.content, expect_course_fit) {
            Ok(analysis) => {
                meter.llm_calls.record_success();
                return Ok(scored(response, analysis, meter));
            }
            Err(e) => {
                meter.llm_calls.record_failure();
                e
            }
        };

        tracing::warn!(
            backend = %backend.descriptor.name,
            assessment = %assessment.id,
            error = %first_error,
            "unusable response, retrying with correction"
        );
        request.prompt = format!(
            "{}\n\n{}",
            request.prompt,
            self.templates
                .render_correction(&first_error.to_string(), expect_course_fit)
        );

        let response = self.call_with_retry(backend, &request, meter).await?;
        match self.parser.parse(&response.content, expect_course_fit) {
            Ok(analysis) => {
                meter.llm_calls.record_success();
                Ok(scored(response, analysis, meter))
            }
            Err(e) => {
                meter.llm_calls.record_failure();
                Err(EvalError::BackendOutputInvalid {
                    backend: backend.descriptor.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn call_with_retry(
        &self,
        backend: &Backend,
        request: &GenerateRequest,
        meter: &mut CallMeter,
    ) -> Result<GenerateResponse, EvalError> {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.call_once(backend, request).await {
                CallOutcome::Success(response) => {
                    meter.tokens +=
                        TokenMetrics::from_usage(response.token_usage, &backend.descriptor.pricing);
                    return Ok(response);
                }
                CallOutcome::Fatal(error) => {
                    meter.llm_calls.record_failure();
                    return Err(EvalError::BackendUnavailable {
                        backend: backend.descriptor.name.clone(),
                        attempts: attempt,
                        message: error.to_string(),
                    });
                }
                CallOutcome::Transient { error, retry_after } => {
                    meter.llm_calls.record_failure();
                    if attempt < max_attempts {
                        let delay = policy.backoff(attempt, retry_after);
                        tracing::warn!(
                            backend = %backend.descriptor.name,
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "transient backend failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(EvalError::BackendUnavailable {
            backend: backend.descriptor.name.clone(),
            attempts: max_attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".into()),
        })
    }
}

fn scored(response: GenerateResponse, analysis: ParsedAnalysis, meter: &CallMeter) -> ScoredResponse {
    ScoredResponse {
        raw: response.content,
        analysis,
        model: response.model,
        tokens: meter.tokens,
        llm_calls: meter.llm_calls,
    }
}

/// Map a provider error onto a call outcome.
fn classify(backend: &str, err: anyhow::Error) -> CallOutcome {
    match err.downcast_ref::<ProviderError>() {
        Some(pe) if pe.is_permanent() => CallOutcome::Fatal(EvalError::BackendUnavailable {
            backend: backend.to_string(),
            attempts: 1,
            message: pe.to_string(),
        }),
        Some(ProviderError::RateLimited { retry_after_ms }) => CallOutcome::Transient {
            error: EvalError::BackendRateLimited {
                backend: backend.to_string(),
                retry_after_ms: *retry_after_ms,
            },
            retry_after: Some(Duration::from_millis(*retry_after_ms)),
        },
        _ => CallOutcome::Transient {
            error: EvalError::BackendUnavailable {
                backend: backend.to_string(),
                attempts: 1,
                message: format!("{err:#}"),
            },
            retry_after: None,
        },
    }
}
