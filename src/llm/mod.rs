//! LLM integration for the job agent.
//!
//! The pipeline talks to `LlmProvider` trait objects. The concrete stack
//! built by `create_provider` is:
//!
//! `MeteredProvider` → `RetryProvider` → `OpenAiProvider`
//!
//! so usage is counted once per logical call and retries stay invisible
//! to the extraction and matching stages.

mod costs;
pub mod json;
pub mod meter;
pub mod openai;
pub mod provider;
pub(crate) mod retry;

pub use meter::{MeteredProvider, TokenUsage};
pub use openai::OpenAiProvider;
pub use provider::*;
pub use retry::{RetryProvider, retry_budget};

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub base_url: Option<String>,
    pub model: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

/// Whether `model` is an o-series/gpt-5 reasoning model that accepts
/// `reasoning_effort`.
pub fn is_reasoning_model(model: &str) -> bool {
    let model = model.rsplit('/').next().unwrap_or(model);
    model.starts_with("gpt-5")
        || (model.starts_with('o') && model[1..].starts_with(|c: char| c.is_ascii_digit()))
}

/// Create a metered, retrying provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<MeteredProvider>, LlmError> {
    let base: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
        config.api_key.clone(),
        config.base_url.as_deref(),
        config.model.clone(),
        config.request_timeout,
    )?);
    let retrying: Arc<dyn LlmProvider> = Arc::new(RetryProvider::new(base, config.max_retries));
    tracing::info!(
        model = %config.model,
        base_url = config.base_url.as_deref().unwrap_or(openai::DEFAULT_BASE_URL),
        "Using OpenAI-compatible provider"
    );
    Ok(Arc::new(MeteredProvider::new(retrying)))
}
