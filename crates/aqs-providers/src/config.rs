//! `aqs.toml` configuration, provider factory and backend registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use aqs_core::context::ChunkingConfig;
use aqs_core::gateway::{GatewayConfig, RetryPolicy};
use aqs_core::metrics::Pricing;
use aqs_core::scoring::ScoringConfig;
use aqs_core::traits::{Backend, BackendDescriptor, BackendRegistry, LlmProvider};

use crate::anthropic::AnthropicProvider;
use crate::error::ConfigError;
use crate::gemini::GeminiProvider;
use crate::mock::MockProvider;
use crate::openai::OpenAiProvider;

const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;

/// Commented starting point written by `aqs init`.
pub const SAMPLE_CONFIG: &str = r#"# aqs configuration
default_backends = ["gemini-flash"]
parallelism = 1
skip_failed = false
temperature = 0.1
max_tokens = 8192
data_dir = "./data"
output_dir = "./aqs-results"
# checkpoint_dir = "./aqs-results/.checkpoints"
# prompts = "./prompts.toml"

[retry]
max_attempts = 3
initial_backoff_ms = 1000
max_backoff_ms = 60000
call_timeout_secs = 120

[chunking]
chunk_chars = 2000
max_chunks = 8

[backends.gemini-flash]
type = "gemini"
api_key = "${GEMINI_API_KEY}"
model = "gemini-2.0-flash"

# [backends.gemini-pro]
# type = "gemini"
# api_key = "${GEMINI_API_KEY}"
# model = "gemini-3-pro-preview"
# pricing = { input_per_million = 2.00, output_per_million = 12.00 }

# [backends.gpt]
# type = "openai"
# api_key = "${OPENAI_API_KEY}"
# model = "gpt-4.1-mini"

# [backends.offline]
# type = "mock"
"#;

/// Which API a backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Anthropic,
    Mock,
}

impl ProviderKind {
    fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::OpenAi => "gpt-4.1-mini",
            ProviderKind::Anthropic => "claude-sonnet-4-20250514",
            ProviderKind::Mock => "mock-model",
        }
    }

    fn key_env_var(self) -> Option<&'static str> {
        match self {
            ProviderKind::Gemini => Some("AQS_GEMINI_KEY"),
            ProviderKind::OpenAi => Some("AQS_OPENAI_KEY"),
            ProviderKind::Anthropic => Some("AQS_ANTHROPIC_KEY"),
            ProviderKind::Mock => None,
        }
    }
}

/// Configuration for a single backend.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// OpenAI only.
    #[serde(default)]
    pub org_id: Option<String>,
    /// Overrides the built-in price list.
    #[serde(default)]
    pub pricing: Option<Pricing>,
    #[serde(default)]
    pub context_window: Option<u32>,
    /// Mock only: fixed response text.
    #[serde(default)]
    pub response: Option<String>,
}

impl BackendConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_key: String::new(),
            base_url: None,
            model: None,
            org_id: None,
            pricing: None,
            context_window: None,
            response: None,
        }
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.kind.default_model())
    }

    fn resolve_env(&mut self) {
        self.api_key = resolve_env_vars(&self.api_key);
        self.base_url = self.base_url.as_deref().map(resolve_env_vars);
        self.org_id = self.org_id.as_deref().map(resolve_env_vars);
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("org_id", &self.org_id)
            .field("pricing", &self.pricing)
            .field("context_window", &self.context_window)
            .finish()
    }
}

/// Top-level aqs configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AqsConfig {
    /// Backends used when `--backend` is not given.
    pub default_backends: Vec<String>,
    /// Max concurrent tasks within a course.
    pub parallelism: usize,
    pub skip_failed: bool,
    pub temperature: f64,
    pub max_tokens: u32,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Defaults to `<output_dir>/.checkpoints`.
    pub checkpoint_dir: Option<PathBuf>,
    /// Prompt template overrides.
    pub prompts: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub scoring: ScoringConfig,
    pub chunking: ChunkingConfig,
    pub backends: BTreeMap<String, BackendConfig>,
}

impl Default for AqsConfig {
    fn default() -> Self {
        let mut gemini = BackendConfig::new(ProviderKind::Gemini);
        gemini.api_key = "${GEMINI_API_KEY}".into();
        Self {
            default_backends: vec!["gemini-flash".into()],
            parallelism: 1,
            skip_failed: false,
            temperature: 0.1,
            max_tokens: 8192,
            data_dir: PathBuf::from("./data"),
            output_dir: PathBuf::from("./aqs-results"),
            checkpoint_dir: None,
            prompts: None,
            retry: RetryPolicy::default(),
            scoring: ScoringConfig::default(),
            chunking: ChunkingConfig::default(),
            backends: BTreeMap::from([("gemini-flash".to_string(), gemini)]),
        }
    }
}

impl AqsConfig {
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join(".checkpoints"))
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            retry: self.retry,
        }
    }

    /// Every problem found, in a stable order. Empty means usable.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut problems = Vec::new();
        let invalid = |field: &str, reason: String| ConfigError::InvalidValue {
            field: field.into(),
            reason,
        };

        if self.parallelism == 0 {
            problems.push(invalid("parallelism", "must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            problems.push(invalid(
                "temperature",
                format!("{} is outside 0.0..=2.0", self.temperature),
            ));
        }
        if self.retry.max_attempts == 0 {
            problems.push(invalid("retry.max_attempts", "must be at least 1".into()));
        }
        let s = &self.scoring;
        for (field, sum) in [
            (
                "scoring weights",
                s.difficulty_weight + s.blooms_weight + s.course_fit_weight,
            ),
            (
                "scoring standalone weights",
                s.standalone_difficulty_weight + s.standalone_blooms_weight,
            ),
        ] {
            if (sum - 1.0).abs() > 1e-6 {
                problems.push(invalid(field, format!("sum to {sum}, expected 1.0")));
            }
        }
        for name in &self.default_backends {
            if !self.backends.contains_key(name) {
                problems.push(ConfigError::UnknownDefaultBackend(name.clone()));
            }
        }
        for (name, backend) in &self.backends {
            if backend.kind != ProviderKind::Mock && backend.api_key.trim().is_empty() {
                problems.push(ConfigError::MissingApiKey {
                    backend: name.clone(),
                });
            }
        }
        problems
    }

    /// Apply `AQS_*_KEY` overrides to every backend of the matching type.
    fn apply_env_overrides(&mut self) {
        for backend in self.backends.values_mut() {
            if let Some(key) = backend
                .kind
                .key_env_var()
                .and_then(|var| std::env::var(var).ok())
            {
                backend.api_key = key;
            }
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `aqs.toml` in the current directory
/// 2. `~/.config/aqs/config.toml`
///
/// Environment variable overrides: `AQS_GEMINI_KEY`, `AQS_OPENAI_KEY`, `AQS_ANTHROPIC_KEY`.
pub fn load_config() -> Result<AqsConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<AqsConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("aqs.toml");
            if local.exists() {
                Some(local)
            } else {
                dirs_path()
                    .map(|dir| dir.join("config.toml"))
                    .filter(|p| p.exists())
            }
        }
    };

    let mut config = match &config_path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            parse_config(
                &std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config: {}", path.display()))?,
            )
            .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => AqsConfig::default(),
    };

    config.apply_env_overrides();
    for backend in config.backends.values_mut() {
        backend.resolve_env();
    }

    Ok(config)
}

fn parse_config(content: &str) -> Result<AqsConfig> {
    Ok(toml::from_str::<AqsConfig>(content)?)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("aqs"))
}

/// Create a provider instance from its configuration.
pub fn create_provider(config: &BackendConfig) -> Result<Arc<dyn LlmProvider>> {
    Ok(match config.kind {
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(
            &config.api_key,
            config.base_url.clone(),
        )?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            &config.api_key,
            config.base_url.clone(),
            config.org_id.clone(),
        )?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            &config.api_key,
            config.base_url.clone(),
        )?),
        ProviderKind::Mock => Arc::new(match &config.response {
            Some(response) => MockProvider::with_fixed_response(response),
            None => MockProvider::default(),
        }),
    })
}

/// Resolve every configured backend into an immutable registry.
///
/// Pricing and context window come from the config when given, then from the
/// provider's model list, then from the default price table.
pub fn build_registry(config: &AqsConfig) -> Result<BackendRegistry> {
    let mut backends = Vec::with_capacity(config.backends.len());
    for (name, backend) in &config.backends {
        let provider = create_provider(backend)
            .with_context(|| format!("failed to create backend '{name}'"))?;
        let model = backend.model().to_string();
        let known = provider
            .available_models()
            .into_iter()
            .find(|m| m.id == model);

        let descriptor = BackendDescriptor {
            name: name.clone(),
            provider: provider.name().to_string(),
            pricing: backend
                .pricing
                .or_else(|| known.as_ref().map(|m| m.pricing))
                .unwrap_or_else(|| Pricing::for_model(&model)),
            context_window: backend
                .context_window
                .or_else(|| known.as_ref().map(|m| m.context_window))
                .unwrap_or(DEFAULT_CONTEXT_WINDOW),
            model,
        };
        debug!(backend = %name, provider = %descriptor.provider, model = %descriptor.model, "registered backend");
        backends.push(Backend {
            descriptor,
            provider,
        });
    }
    Ok(BackendRegistry::new(backends))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_AQS_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_AQS_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_AQS_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("${_AQS_UNSET_VAR_XYZ}"), "");
        assert_eq!(resolve_env_vars("dangling ${oops"), "dangling ${oops");
        std::env::remove_var("_AQS_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = AqsConfig::default();
        assert_eq!(config.default_backends, vec!["gemini-flash"]);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.temperature, 0.1);
        assert_eq!(
            config.checkpoint_dir(),
            PathBuf::from("./aqs-results/.checkpoints")
        );
    }

    #[test]
    fn sample_config_parses() {
        let config = parse_config(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.backends["gemini-flash"].kind, ProviderKind::Gemini);
        assert_eq!(config.backends["gemini-flash"].model(), "gemini-2.0-flash");
        assert_eq!(config.chunking.chunk_chars, 2000);
        assert_eq!(config.scoring, ScoringConfig::default());
    }

    #[test]
    fn parse_backend_config() {
        let toml_str = r#"
default_backends = ["pro", "offline"]
parallelism = 4

[scoring]
small_sample_threshold = 3

[backends.pro]
type = "gemini"
api_key = "sk-test"
model = "gemini-3-pro-preview"

[backends.gpt]
type = "openai"
api_key = "sk-openai"
pricing = { input_per_million = 1.0, output_per_million = 2.0 }
context_window = 64000

[backends.offline]
type = "mock"
"#;
        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.backends.len(), 3);
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.scoring.small_sample_threshold, 3);
        assert_eq!(config.scoring.precision, 2);
        assert_eq!(config.backends["gpt"].model(), "gpt-4.1-mini");
        assert!(config.validate().is_empty());

        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.names(), vec!["gpt", "offline", "pro"]);
        let pro = &registry.get("pro").unwrap().descriptor;
        assert_eq!(pro.provider, "gemini");
        assert_eq!(pro.pricing, Pricing::new(2.00, 12.00));
        let gpt = &registry.get("gpt").unwrap().descriptor;
        assert_eq!(gpt.pricing, Pricing::new(1.0, 2.0));
        assert_eq!(gpt.context_window, 64_000);
        let offline = &registry.get("offline").unwrap().descriptor;
        assert_eq!(offline.model, "mock-model");
        assert_eq!(offline.pricing, Pricing::new(0.0, 0.0));
    }

    #[test]
    fn unknown_model_uses_default_pricing() {
        let mut config = AqsConfig::default();
        let mut backend = BackendConfig::new(ProviderKind::Gemini);
        backend.api_key = "k".into();
        backend.model = Some("gemini-experimental".into());
        config.backends = BTreeMap::from([("exp".to_string(), backend)]);

        let registry = build_registry(&config).unwrap();
        let descriptor = &registry.get("exp").unwrap().descriptor;
        assert_eq!(descriptor.pricing, Pricing::default());
        assert_eq!(descriptor.context_window, DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn validation_reports_problems() {
        let mut config = AqsConfig::default();
        config.parallelism = 0;
        config.default_backends.push("missing".into());
        config.backends.get_mut("gemini-flash").unwrap().api_key = String::new();
        config.scoring.blooms_weight = 0.5;

        let problems = config.validate();
        assert!(problems.contains(&ConfigError::UnknownDefaultBackend("missing".into())));
        assert!(problems.contains(&ConfigError::MissingApiKey {
            backend: "gemini-flash".into()
        }));
        assert!(problems
            .iter()
            .any(|p| matches!(p, ConfigError::InvalidValue { field, .. } if field == "parallelism")));
        assert!(problems
            .iter()
            .any(|p| matches!(p, ConfigError::InvalidValue { field, .. } if field == "scoring weights")));
    }

    #[test]
    fn debug_masks_api_key() {
        let mut backend = BackendConfig::new(ProviderKind::OpenAi);
        backend.api_key = "sk-secret".into();
        let debug = format!("{backend:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aqs.toml");
        std::fs::write(
            &path,
            "[backends.local]\ntype = \"mock\"\nresponse = \"{}\"\n",
        )
        .unwrap();

        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.backends["local"].response.as_deref(), Some("{}"));
        // An explicit [backends] table replaces the default one.
        assert!(!config.backends.contains_key("gemini-flash"));

        let missing = dir.path().join("nope.toml");
        let err = load_config_from(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
