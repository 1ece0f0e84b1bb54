//! Scoring backend integrations for aqs.
//!
//! Implements the `LlmProvider` trait for Gemini, OpenAI and Anthropic, plus
//! a scripted mock, and loads the `aqs.toml` configuration that wires them
//! into a [`aqs_core::traits::BackendRegistry`].

pub mod anthropic;
pub mod config;
pub mod error;
pub mod gemini;
pub mod mock;
pub mod openai;

pub use config::{
    build_registry, create_provider, load_config, load_config_from, AqsConfig, BackendConfig,
    ProviderKind, SAMPLE_CONFIG,
};
pub use error::{ConfigError, ProviderError};
