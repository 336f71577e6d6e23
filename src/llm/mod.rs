//! Generative backend integration.
//!
//! The pipeline depends only on the `LlmProvider` trait; the Anthropic
//! Messages API backend is the one concrete implementation. The backend is
//! an optional accelerant — with none configured (or on any failure) the
//! composer falls back to deterministic templates.

pub mod anthropic;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use provider::*;

use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Default Messages API version header.
const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Configuration for creating a generative backend.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Create a generative backend from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = AnthropicProvider::new(
        config.api_key.expose_secret(),
        DEFAULT_API_VERSION,
        config.model.clone(),
    )?;
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(provider))
}
