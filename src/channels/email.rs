//! Email dispatch over SMTP via lettre.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::channels::{Dispatcher, render};
use crate::error::DispatchError;
use crate::pipeline::batcher::NotificationBatch;

const CHANNEL: &str = "email";

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub sender_name: String,
    pub to_address: String,
}

// ── Dispatcher ──────────────────────────────────────────────────────

pub struct EmailDispatcher {
    config: EmailConfig,
    from: Mailbox,
    to: Mailbox,
}

impl EmailDispatcher {
    /// Validates both addresses up front so a bad config fails before the
    /// run spends anything on capability calls.
    pub fn new(config: EmailConfig) -> Result<Self, DispatchError> {
        let from_address: Address = config.username.parse().map_err(|e| invalid(format!(
            "invalid sender address {:?}: {e}",
            config.username
        )))?;
        let to_address: Address = config.to_address.parse().map_err(|e| invalid(format!(
            "invalid recipient address {:?}: {e}",
            config.to_address
        )))?;

        let from = Mailbox::new(Some(config.sender_name.clone()), from_address);
        let to = Mailbox::new(None, to_address);
        Ok(Self { config, from, to })
    }

    fn build_message(&self, batch: &NotificationBatch) -> Result<Message, DispatchError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(render::subject(batch))
            .multipart(MultiPart::alternative_plain_html(
                render::plain_text(batch),
                render::html(batch),
            ))
            .map_err(|e| send_failed(format!("Failed to build email: {e}")))
    }

    fn transport(&self) -> Result<SmtpTransport, DispatchError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );

        // 465 is implicit TLS; anything else negotiates STARTTLS.
        let builder = if self.config.smtp_port == 465 {
            SmtpTransport::relay(&self.config.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
        }
        .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?;

        Ok(builder
            .port(self.config.smtp_port)
            .credentials(creds)
            .build())
    }
}

fn invalid(reason: String) -> DispatchError {
    DispatchError::InvalidAddress {
        channel: CHANNEL.into(),
        reason,
    }
}

fn send_failed(reason: String) -> DispatchError {
    DispatchError::SendFailed {
        channel: CHANNEL.into(),
        reason,
    }
}

#[async_trait]
impl Dispatcher for EmailDispatcher {
    fn name(&self) -> &str {
        CHANNEL
    }

    async fn send(&self, batch: &NotificationBatch) -> Result<(), DispatchError> {
        let message = self.build_message(batch)?;
        let transport = self.transport()?;

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| send_failed(format!("SMTP task failed: {e}")))?
            .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;

        tracing::info!(
            to = %self.config.to_address,
            jobs = batch.len(),
            run_id = %batch.run_id,
            "Email notification sent"
        );
        Ok(())
    }
}
