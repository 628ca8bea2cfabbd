//! Retry wrapper for capability calls.
//!
//! Pipeline stages make exactly one logical call per job; transient
//! provider failures (rate limits, transport errors) are retried here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Base delay for exponential backoff.
const BASE_BACKOFF_MS: u64 = 500;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Worst-case wall time of one logical call through a `RetryProvider`:
/// every attempt runs to `request_timeout` and every backoff hits the cap.
pub fn retry_budget(request_timeout: Duration, max_retries: u32) -> Duration {
    request_timeout
        .saturating_mul(max_retries.saturating_add(1))
        .saturating_add(MAX_BACKOFF.saturating_mul(max_retries))
}

/// Retries transient failures of the wrapped provider.
pub struct RetryProvider {
    inner: Arc<dyn LlmProvider>,
    max_retries: u32,
    base_backoff: Duration,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }

    pub fn with_base_backoff(mut self, base: Duration) -> Self {
        self.base_backoff = base;
        self
    }

    fn backoff(&self, attempt: u32, err: &LlmError) -> Duration {
        if let LlmError::RateLimited {
            retry_after: Some(after),
            ..
        } = err
        {
            return (*after).min(MAX_BACKOFF);
        }
        let exp = self.base_backoff.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = rand::thread_rng().gen_range(0..=self.base_backoff.as_millis() as u64);
        (exp + Duration::from_millis(jitter_ms)).min(MAX_BACKOFF)
    }
}

#[async_trait]
impl LlmProvider for RetryProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.inner.cost_per_token()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt, &e);
                    warn!(
                        model = %self.inner.model_name(),
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient LLM failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{ChatMessage, FinishReason};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with the given error kind, then succeeds.
    struct FlakyLlm {
        failures: u32,
        transient: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyLlm {
        fn model_name(&self) -> &str {
            "flaky"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(if self.transient {
                    LlmError::RequestFailed {
                        provider: "flaky".into(),
                        reason: "reset".into(),
                    }
                } else {
                    LlmError::AuthFailed {
                        provider: "flaky".into(),
                    }
                });
            }
            Ok(CompletionResponse {
                content: "ok".into(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let inner = Arc::new(FlakyLlm {
            failures: 2,
            transient: true,
            calls: AtomicU32::new(0),
        });
        let retry = RetryProvider::new(inner.clone(), 3).with_base_backoff(Duration::from_millis(1));
        let resp = retry.complete(request()).await.unwrap();
        assert_eq!(resp.content, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = Arc::new(FlakyLlm {
            failures: 10,
            transient: true,
            calls: AtomicU32::new(0),
        });
        let retry = RetryProvider::new(inner.clone(), 2).with_base_backoff(Duration::from_millis(1));
        assert!(retry.complete(request()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_failures() {
        let inner = Arc::new(FlakyLlm {
            failures: 1,
            transient: false,
            calls: AtomicU32::new(0),
        });
        let retry = RetryProvider::new(inner.clone(), 5).with_base_backoff(Duration::from_millis(1));
        let err = retry.complete(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::AuthFailed { .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn budget_covers_every_attempt_and_backoff() {
        let per_request = Duration::from_secs(60);
        assert_eq!(retry_budget(per_request, 0), per_request);
        assert_eq!(retry_budget(per_request, 2), Duration::from_secs(60 * 3 + 30 * 2));
        assert!(retry_budget(per_request, 1) > per_request * 2);
    }

    /// A request that hangs to its timeout every time still gets its
    /// retries inside the stage budget.
    #[tokio::test(start_paused = true)]
    async fn retries_fit_inside_the_budget() {
        struct TimesOut {
            per_request: Duration,
            calls: AtomicU32,
        }

        #[async_trait]
        impl LlmProvider for TimesOut {
            fn model_name(&self) -> &str {
                "slow"
            }

            fn cost_per_token(&self) -> (Decimal, Decimal) {
                (Decimal::ZERO, Decimal::ZERO)
            }

            async fn complete(
                &self,
                _request: CompletionRequest,
            ) -> Result<CompletionResponse, LlmError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.per_request).await;
                Err(LlmError::RequestFailed {
                    provider: "slow".into(),
                    reason: "timed out".into(),
                })
            }
        }

        let per_request = Duration::from_secs(60);
        let inner = Arc::new(TimesOut {
            per_request,
            calls: AtomicU32::new(0),
        });
        let retry = RetryProvider::new(inner.clone(), 2);
        let outcome =
            tokio::time::timeout(retry_budget(per_request, 2), retry.complete(request())).await;
        assert!(matches!(outcome, Ok(Err(LlmError::RequestFailed { .. }))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }
}
