//! WhatsApp dispatch through the Twilio Messages API.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::channels::{Dispatcher, render};
use crate::error::DispatchError;
use crate::pipeline::batcher::NotificationBatch;

const CHANNEL: &str = "whatsapp";

pub const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Sender number, with or without the `whatsapp:` prefix.
    pub from: String,
    /// Recipient number, with or without the `whatsapp:` prefix.
    pub to: String,
}

pub struct WhatsAppDispatcher {
    client: reqwest::Client,
    config: WhatsAppConfig,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

fn whatsapp_address(number: &str) -> String {
    let number = number.trim();
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

impl WhatsAppDispatcher {
    pub fn new(config: WhatsAppConfig) -> Result<Self, DispatchError> {
        for (label, value) in [("from", &config.from), ("to", &config.to)] {
            let digits = value.trim().trim_start_matches("whatsapp:");
            if !digits.starts_with('+') || digits.len() < 8 {
                return Err(DispatchError::InvalidAddress {
                    channel: CHANNEL.into(),
                    reason: format!("{label} number {value:?} must be in E.164 form (+15551234567)"),
                });
            }
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DispatchError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            api_base: TWILIO_API_BASE.to_string(),
        })
    }

    /// Point at a different API host (tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.api_base, self.config.account_sid
        )
    }

    async fn send_one(&self, body: &str) -> Result<TwilioMessage, DispatchError> {
        let form = [
            ("From", whatsapp_address(&self.config.from)),
            ("To", whatsapp_address(&self.config.to)),
            ("Body", body.to_string()),
        ];

        let response = self
            .client
            .post(self.endpoint())
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<TwilioError>(&text)
                .map(|e| match e.code {
                    Some(code) => format!("{status}: {} (code {code})", e.message),
                    None => format!("{status}: {}", e.message),
                })
                .unwrap_or_else(|_| format!("{status}: {text}"));
            return Err(DispatchError::SendFailed {
                channel: CHANNEL.into(),
                reason,
            });
        }

        response
            .json::<TwilioMessage>()
            .await
            .map_err(|e| DispatchError::Http(format!("Unexpected Twilio response: {e}")))
    }
}

#[async_trait]
impl Dispatcher for WhatsAppDispatcher {
    fn name(&self) -> &str {
        CHANNEL
    }

    async fn send(&self, batch: &NotificationBatch) -> Result<(), DispatchError> {
        let messages = render::whatsapp_messages(batch);
        let parts = messages.len();

        for (idx, body) in messages.iter().enumerate() {
            let sent = self.send_one(body).await?;
            tracing::debug!(
                sid = %sent.sid,
                status = sent.status.as_deref().unwrap_or("unknown"),
                part = idx + 1,
                parts,
                "WhatsApp message accepted"
            );
        }

        tracing::info!(
            to = %self.config.to,
            jobs = batch.len(),
            parts,
            run_id = %batch.run_id,
            "WhatsApp notification sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batcher::BatchEntry;
    use crate::pipeline::types::{ExtractedRequirements, JobSummary, MatchResult};
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> WhatsAppConfig {
        WhatsAppConfig {
            account_sid: "AC123".into(),
            auth_token: SecretString::from("token"),
            from: "whatsapp:+14155238886".into(),
            to: "+4915112345678".into(),
        }
    }

    fn batch() -> NotificationBatch {
        NotificationBatch::build(
            Uuid::new_v4(),
            Utc::now(),
            1,
            vec![BatchEntry {
                job: JobSummary {
                    job_id: "job:1".into(),
                    title: "Rust Engineer".into(),
                    company: "Ferrous".into(),
                    location: "Remote".into(),
                    source_url: Some("https://jobs.example.com/1".into()),
                },
                result: MatchResult {
                    job_id: "job:1".into(),
                    score: 77,
                    reasoning: "Good".into(),
                    strong_matches: vec![],
                    gaps: vec![],
                    cv_suggestions: vec![],
                    requirements: ExtractedRequirements::default(),
                    evaluated_at: Utc::now(),
                },
                carried_over: false,
            }],
        )
    }

    #[test]
    fn numbers_get_whatsapp_prefix_once() {
        assert_eq!(whatsapp_address("+123"), "whatsapp:+123");
        assert_eq!(whatsapp_address("whatsapp:+123"), "whatsapp:+123");
    }

    #[test]
    fn rejects_non_e164_numbers() {
        let mut cfg = config();
        cfg.to = "015112345678".into();
        assert!(matches!(
            WhatsAppDispatcher::new(cfg),
            Err(DispatchError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn posts_form_to_twilio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Accounts/AC123/Messages.json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=whatsapp%3A%2B4915112345678"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"sid": "SM1", "status": "queued"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = WhatsAppDispatcher::new(config())
            .unwrap()
            .with_api_base(server.uri());
        dispatcher.send(&batch()).await.unwrap();
    }

    #[tokio::test]
    async fn twilio_error_is_send_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                serde_json::json!({"code": 63007, "message": "Channel not found"}),
            ))
            .mount(&server)
            .await;

        let dispatcher = WhatsAppDispatcher::new(config())
            .unwrap()
            .with_api_base(server.uri());
        let err = dispatcher.send(&batch()).await.unwrap_err();
        match err {
            DispatchError::SendFailed { reason, .. } => assert!(reason.contains("63007")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
