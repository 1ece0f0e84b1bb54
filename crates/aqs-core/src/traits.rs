//! Backend trait and the registry of configured backends.
//!
//! `LlmProvider` is implemented by the `aqs-providers` crate; the registry is
//! built once at startup and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::metrics::{Pricing, TokenUsage};

// ---------------------------------------------------------------------------
// LLM Provider trait
// ---------------------------------------------------------------------------

/// A scoring backend that turns a prompt into text.
///
/// Implementations should return a [`crate::error::ProviderError`] (wrapped in
/// `anyhow`) for transport failures so the gateway can classify them.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider family name (e.g. "gemini").
    fn name(&self) -> &str;

    /// Run one completion.
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse>;

    /// Models this provider knows about.
    fn available_models(&self) -> Vec<ModelInfo>;
}

/// A single completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Ask the backend for a JSON-only response where it supports that.
    #[serde(default)]
    pub json_output: bool,
}

/// A completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub content: String,
    /// Model that actually answered.
    pub model: String,
    pub token_usage: TokenUsage,
    pub latency_ms: u64,
}

/// A model a provider can serve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub context_window: u32,
    pub pricing: Pricing,
}

// ---------------------------------------------------------------------------
// Backend registry
// ---------------------------------------------------------------------------

/// Static capabilities of a configured backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Configuration key, used in task keys and output paths.
    pub name: String,
    /// Provider family.
    pub provider: String,
    pub model: String,
    pub pricing: Pricing,
    pub context_window: u32,
}

/// A descriptor paired with the provider that serves it.
#[derive(Clone)]
pub struct Backend {
    pub descriptor: BackendDescriptor,
    pub provider: Arc<dyn LlmProvider>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("descriptor", &self.descriptor)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// Immutable set of backends keyed by name.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Backend>,
}

impl BackendRegistry {
    pub fn new(backends: impl IntoIterator<Item = Backend>) -> Self {
        Self {
            backends: backends
                .into_iter()
                .map(|b| (b.descriptor.name.clone(), b))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Backend> {
        self.backends.get(name)
    }

    /// Backend names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &BackendDescriptor> {
        self.backends.values().map(|b| &b.descriptor)
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    #[async_trait]
    impl LlmProvider for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
            Ok(GenerateResponse {
                content: String::new(),
                model: request.model.clone(),
                token_usage: TokenUsage::default(),
                latency_ms: 0,
            })
        }

        fn available_models(&self) -> Vec<ModelInfo> {
            vec![]
        }
    }

    fn backend(name: &str) -> Backend {
        Backend {
            descriptor: BackendDescriptor {
                name: name.into(),
                provider: "silent".into(),
                model: "m".into(),
                pricing: Pricing::default(),
                context_window: 1000,
            },
            provider: Arc::new(Silent),
        }
    }

    #[test]
    fn registry_lookup_and_order() {
        let registry = BackendRegistry::new([backend("zeta"), backend("alpha")]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("beta").is_none());
        assert!(format!("{:?}", registry.get("zeta").unwrap()).contains("silent"));
    }
}
