//! Token usage metering for capability calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Aggregated usage across calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenUsage {
    pub calls: u64,
    pub failed_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: Decimal,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn merge(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            calls: self.calls + other.calls,
            failed_calls: self.failed_calls + other.failed_calls,
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            estimated_cost_usd: self.estimated_cost_usd + other.estimated_cost_usd,
        }
    }
}

/// Counts calls and tokens flowing through the wrapped provider.
pub struct MeteredProvider {
    inner: Arc<dyn LlmProvider>,
    calls: AtomicU64,
    failed_calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl MeteredProvider {
    pub fn new(inner: Arc<dyn LlmProvider>) -> Self {
        Self {
            inner,
            calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    pub fn usage(&self) -> TokenUsage {
        let input_tokens = self.input_tokens.load(Ordering::Relaxed);
        let output_tokens = self.output_tokens.load(Ordering::Relaxed);
        let (cost_in, cost_out) = self.inner.cost_per_token();
        TokenUsage {
            calls: self.calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            input_tokens,
            output_tokens,
            estimated_cost_usd: cost_in * Decimal::from(input_tokens)
                + cost_out * Decimal::from(output_tokens),
        }
    }
}

#[async_trait]
impl LlmProvider for MeteredProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.inner.cost_per_token()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let result = self.inner.complete(request).await;
        match &result {
            Ok(resp) => {
                self.input_tokens
                    .fetch_add(u64::from(resp.input_tokens), Ordering::Relaxed);
                self.output_tokens
                    .fetch_add(u64::from(resp.output_tokens), Ordering::Relaxed);
            }
            Err(_) => {
                self.failed_calls.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }
}
