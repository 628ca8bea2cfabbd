//! OpenAI-compatible chat-completions client over reqwest.
//!
//! Works against api.openai.com or any server exposing the same
//! `/chat/completions` contract (set `LLM_BASE_URL`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::costs::model_cost;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

const PROVIDER: &str = "openai";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions provider for one model.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    cost: (Decimal, Decimal),
}

impl OpenAiProvider {
    pub fn new(
        api_key: SecretString,
        base_url: Option<&str>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        let model = model.into();
        let cost = model_cost(&model);
        Ok(Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model,
            cost,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        // Reasoning models reject the `system` role and sampling params.
        let reasoning = request.reasoning_effort.is_some();
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System if reasoning => "developer",
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(effort) = request.reasoning_effort {
            body["reasoning_effort"] = effort.as_str().into();
            if let Some(max) = request.max_tokens {
                body["max_completion_tokens"] = max.into();
            }
        } else {
            if let Some(t) = request.temperature {
                body["temperature"] = t.into();
            }
            if let Some(max) = request.max_tokens {
                body["max_tokens"] = max.into();
            }
        }
        if request.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    id: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.cost
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.request_body(&request);

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = resp.text().await.unwrap_or_default();
            return Err(map_status(status, retry_after, &self.model, text));
        }

        let completion: ChatCompletion =
            resp.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "response contained no choices".to_string(),
            })?;
        let usage = completion.usage.unwrap_or_default();

        debug!(
            model = %self.model,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "Completion received"
        );

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason: FinishReason::from_openai(choice.finish_reason.as_deref()),
            response_id: completion.id,
        })
    }
}

fn map_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    model: &str,
    body: String,
) -> LlmError {
    let snippet: String = body.chars().take(300).collect();
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed {
            provider: PROVIDER.to_string(),
        },
        StatusCode::NOT_FOUND => LlmError::ModelNotAvailable {
            provider: PROVIDER.to_string(),
            model: model.to_string(),
        },
        s if s.is_server_error() => LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("HTTP {s}: {snippet}"),
        },
        s => LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("HTTP {s}: {snippet}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{ChatMessage, ReasoningEffort};

    fn provider(model: &str) -> OpenAiProvider {
        OpenAiProvider::new(
            SecretString::from("sk-test"),
            Some("http://localhost:9999/v1/"),
            model,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        assert_eq!(
            provider("gpt-4o-mini").endpoint(),
            "http://localhost:9999/v1/chat/completions"
        );
    }

    #[test]
    fn plain_request_uses_sampling_params() {
        let p = provider("gpt-4o-mini");
        let req = CompletionRequest::new(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
        ])
        .with_temperature(0.1)
        .with_max_tokens(256)
        .json();
        let body = p.request_body(&req);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["max_tokens"], 256);
        assert!(body["temperature"].is_number());
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!(body.get("reasoning_effort").is_none());
    }

    #[test]
    fn reasoning_request_drops_temperature() {
        let p = provider("o3-mini");
        let req = CompletionRequest::new(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
        ])
        .with_temperature(0.1)
        .with_max_tokens(2048)
        .with_reasoning_effort(Some(ReasoningEffort::Low));
        let body = p.request_body(&req);
        assert_eq!(body["reasoning_effort"], "low");
        assert_eq!(body["messages"][0]["role"], "developer");
        assert_eq!(body["max_completion_tokens"], 2048);
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, None, "m", String::new()),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, None, "m", String::new()),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, None, "m", "oops".into()),
            LlmError::RequestFailed { .. }
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, None, "m", "bad".into()),
            LlmError::InvalidResponse { .. }
        ));
    }
}
