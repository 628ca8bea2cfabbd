//! Configuration from environment variables.
//!
//! Everything goes through `AppConfig::from_lookup`, which takes a
//! lookup function instead of reading the process environment directly,
//! so tests can supply values without mutating global state.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::{EmailConfig, WhatsAppConfig};
use crate::error::ConfigError;
use crate::llm::{LlmConfig, ReasoningEffort, is_reasoning_model, retry_budget};
use crate::pipeline::{PipelineConfig, Threshold, TitleExclusions};

// ── Defaults ────────────────────────────────────────────────────────

const DEFAULT_EXTRACT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MATCH_MODEL: &str = "o3-mini";
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_HISTORY_PATH: &str = "data/history.json";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 465;
const DEFAULT_SENDER_NAME: &str = "Job Agent";

/// Where the batch goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationMethod {
    Gmail,
    WhatsApp,
    Log,
}

impl FromStr for NotificationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gmail" | "email" | "smtp" => Ok(Self::Gmail),
            "whatsapp" => Ok(Self::WhatsApp),
            "log" | "none" => Ok(Self::Log),
            other => Err(format!("unknown notification method {other:?} (gmail|whatsapp|log)")),
        }
    }
}

/// Resolved transport settings for the selected method.
#[derive(Debug, Clone)]
pub enum NotifierConfig {
    Email(EmailConfig),
    WhatsApp(WhatsAppConfig),
    Log,
}

/// Raw transport settings. Only the selected method's fields are
/// required, and only when a real dispatch is requested.
#[derive(Debug, Clone, Default)]
pub struct NotifierSettings {
    pub notification_email: Option<String>,
    pub sender_name: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub email_user: Option<String>,
    pub email_password: Option<SecretString>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<SecretString>,
    pub twilio_whatsapp_from: Option<String>,
    pub whatsapp_to: Option<String>,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: Option<SecretString>,
    pub llm_base_url: Option<String>,
    pub extract_model: String,
    pub match_model: String,
    pub reasoning_effort: ReasoningEffort,
    pub llm_max_retries: u32,
    pub capability_timeout: Duration,
    pub threshold: Threshold,
    pub concurrency_limit: usize,
    pub exclusions: TitleExclusions,
    pub cv_path: Option<PathBuf>,
    pub history_path: PathBuf,
    pub log_dir: PathBuf,
    pub notification_method: NotificationMethod,
    pub notifier: NotifierSettings,
}

fn required(key: &str, value: Option<String>, hint: &str) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{v:?}: {e}"),
        }),
    }
}

impl AppConfig {
    /// Build from the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let threshold = Threshold::new(parse_or("MATCH_THRESHOLD", get("MATCH_THRESHOLD"), 50i64)?)?;

        let concurrency_limit: usize =
            parse_or("MATCH_CONCURRENCY", get("MATCH_CONCURRENCY"), DEFAULT_CONCURRENCY)?;
        if concurrency_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MATCH_CONCURRENCY".into(),
                message: "must be at least 1".into(),
            });
        }

        let timeout_secs: u64 = parse_or(
            "CAPABILITY_TIMEOUT_SECS",
            get("CAPABILITY_TIMEOUT_SECS"),
            DEFAULT_TIMEOUT_SECS,
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CAPABILITY_TIMEOUT_SECS".into(),
                message: "must be at least 1".into(),
            });
        }

        let notifier = NotifierSettings {
            notification_email: get("NOTIFICATION_EMAIL"),
            sender_name: get("NOTIFICATION_SENDER_NAME")
                .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string()),
            smtp_host: get("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            smtp_port: parse_or("SMTP_PORT", get("SMTP_PORT"), DEFAULT_SMTP_PORT)?,
            email_user: get("EMAIL_USER"),
            email_password: get("EMAIL_PASSWORD").map(SecretString::from),
            twilio_account_sid: get("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: get("TWILIO_AUTH_TOKEN").map(SecretString::from),
            twilio_whatsapp_from: get("TWILIO_WHATSAPP_FROM"),
            whatsapp_to: get("WHATSAPP_TO"),
        };

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY").map(SecretString::from),
            llm_base_url: get("LLM_BASE_URL"),
            extract_model: get("JD_EXTRACT_MODEL")
                .unwrap_or_else(|| DEFAULT_EXTRACT_MODEL.to_string()),
            match_model: get("MATCH_MODEL").unwrap_or_else(|| DEFAULT_MATCH_MODEL.to_string()),
            reasoning_effort: parse_or(
                "REASONING_EFFORT",
                get("REASONING_EFFORT"),
                ReasoningEffort::Low,
            )?,
            llm_max_retries: parse_or("LLM_MAX_RETRIES", get("LLM_MAX_RETRIES"), DEFAULT_MAX_RETRIES)?,
            capability_timeout: Duration::from_secs(timeout_secs),
            threshold,
            concurrency_limit,
            exclusions: TitleExclusions::from_csv(
                &get("EXCLUDE_TITLE_KEYWORDS").unwrap_or_default(),
            ),
            cv_path: get("CV_PATH").map(PathBuf::from),
            history_path: get("HISTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_PATH)),
            log_dir: get("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            notification_method: parse_or(
                "NOTIFICATION_METHOD",
                get("NOTIFICATION_METHOD"),
                NotificationMethod::Gmail,
            )?,
            notifier,
        })
    }

    /// The CV to load: `CV_PATH`, or the first CV-looking file in `data/`.
    pub fn resolve_cv_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.cv_path {
            return Ok(path.clone());
        }
        crate::profile::detect_cv_path(Path::new(DEFAULT_DATA_DIR)).ok_or_else(|| {
            ConfigError::MissingRequired {
                key: "CV_PATH".into(),
                hint: format!("Set CV_PATH or put cv.pdf / cv.txt in {DEFAULT_DATA_DIR}/"),
            }
        })
    }

    fn llm_config(&self, model: &str) -> Result<LlmConfig, ConfigError> {
        let api_key = self.openai_api_key.clone().ok_or_else(|| ConfigError::MissingRequired {
            key: "OPENAI_API_KEY".into(),
            hint: "export OPENAI_API_KEY=sk-...".into(),
        })?;
        Ok(LlmConfig {
            api_key,
            base_url: self.llm_base_url.clone(),
            model: model.to_string(),
            request_timeout: self.capability_timeout,
            max_retries: self.llm_max_retries,
        })
    }

    pub fn extract_llm_config(&self) -> Result<LlmConfig, ConfigError> {
        self.llm_config(&self.extract_model)
    }

    pub fn match_llm_config(&self) -> Result<LlmConfig, ConfigError> {
        self.llm_config(&self.match_model)
    }

    /// Outer limit on one extraction or match call. `capability_timeout`
    /// bounds each HTTP attempt; this leaves room for the retries.
    pub fn stage_timeout(&self) -> Duration {
        retry_budget(self.capability_timeout, self.llm_max_retries)
    }

    /// Effort hint for the match model; `None` for models that reject it.
    pub fn match_reasoning_effort(&self) -> Option<ReasoningEffort> {
        is_reasoning_model(&self.match_model).then_some(self.reasoning_effort)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            threshold: self.threshold,
            concurrency_limit: self.concurrency_limit,
            exclusions: self.exclusions.clone(),
        }
    }

    /// Resolve the selected transport, checking its required settings.
    pub fn notifier_config(&self) -> Result<NotifierConfig, ConfigError> {
        let n = &self.notifier;
        match self.notification_method {
            NotificationMethod::Log => Ok(NotifierConfig::Log),
            NotificationMethod::Gmail => {
                let username = required(
                    "EMAIL_USER",
                    n.email_user.clone(),
                    "SMTP login, e.g. you@gmail.com",
                )?;
                let password = n.email_password.clone().ok_or_else(|| {
                    ConfigError::MissingRequired {
                        key: "EMAIL_PASSWORD".into(),
                        hint: "Use an app password for Gmail".into(),
                    }
                })?;
                let to_address = n
                    .notification_email
                    .clone()
                    .unwrap_or_else(|| username.clone());
                Ok(NotifierConfig::Email(EmailConfig {
                    smtp_host: n.smtp_host.clone(),
                    smtp_port: n.smtp_port,
                    username,
                    password,
                    sender_name: n.sender_name.clone(),
                    to_address,
                }))
            }
            NotificationMethod::WhatsApp => {
                let auth_token = n.twilio_auth_token.clone().ok_or_else(|| {
                    ConfigError::MissingRequired {
                        key: "TWILIO_AUTH_TOKEN".into(),
                        hint: "From the Twilio console".into(),
                    }
                })?;
                Ok(NotifierConfig::WhatsApp(WhatsAppConfig {
                    account_sid: required(
                        "TWILIO_ACCOUNT_SID",
                        n.twilio_account_sid.clone(),
                        "From the Twilio console",
                    )?,
                    auth_token,
                    from: required(
                        "TWILIO_WHATSAPP_FROM",
                        n.twilio_whatsapp_from.clone(),
                        "e.g. whatsapp:+14155238886",
                    )?,
                    to: required("WHATSAPP_TO", n.whatsapp_to.clone(), "e.g. +15551234567")?,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.extract_model, "gpt-4o-mini");
        assert_eq!(cfg.match_model, "o3-mini");
        assert_eq!(cfg.reasoning_effort, ReasoningEffort::Low);
        assert_eq!(cfg.threshold.value(), 50);
        assert_eq!(cfg.concurrency_limit, 4);
        assert_eq!(cfg.capability_timeout, Duration::from_secs(60));
        assert_eq!(cfg.llm_max_retries, 2);
        assert_eq!(cfg.history_path, PathBuf::from("data/history.json"));
        assert_eq!(cfg.notification_method, NotificationMethod::Gmail);
        assert_eq!(cfg.notifier.smtp_port, 465);
        assert!(cfg.exclusions.is_empty());
        assert!(cfg.openai_api_key.is_none());
    }

    #[test]
    fn overrides_and_blank_values() {
        let cfg = config(&[
            ("MATCH_THRESHOLD", "75"),
            ("MATCH_CONCURRENCY", "8"),
            ("REASONING_EFFORT", "High"),
            ("EXCLUDE_TITLE_KEYWORDS", "senior, lead"),
            ("LLM_BASE_URL", "   "),
            ("NOTIFICATION_METHOD", "log"),
        ])
        .unwrap();
        assert_eq!(cfg.threshold.value(), 75);
        assert_eq!(cfg.concurrency_limit, 8);
        assert_eq!(cfg.reasoning_effort, ReasoningEffort::High);
        assert_eq!(cfg.exclusions.keywords(), &["senior", "lead"]);
        assert!(cfg.llm_base_url.is_none());
        assert!(matches!(cfg.notifier_config().unwrap(), NotifierConfig::Log));
    }

    #[test]
    fn invalid_values_rejected() {
        for (key, value) in [
            ("MATCH_THRESHOLD", "101"),
            ("MATCH_THRESHOLD", "-5"),
            ("MATCH_THRESHOLD", "high"),
            ("MATCH_CONCURRENCY", "0"),
            ("CAPABILITY_TIMEOUT_SECS", "0"),
            ("REASONING_EFFORT", "max"),
            ("NOTIFICATION_METHOD", "pigeon"),
            ("SMTP_PORT", "99999"),
        ] {
            let err = config(&[(key, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { .. }),
                "{key}={value} gave {err:?}"
            );
        }
    }

    #[test]
    fn stage_timeout_leaves_room_for_retries() {
        let cfg = config(&[("CAPABILITY_TIMEOUT_SECS", "20"), ("LLM_MAX_RETRIES", "3")]).unwrap();
        assert_eq!(cfg.capability_timeout, Duration::from_secs(20));
        assert_eq!(cfg.stage_timeout(), Duration::from_secs(20 * 4 + 30 * 3));

        let no_retries = config(&[("LLM_MAX_RETRIES", "0")]).unwrap();
        assert_eq!(no_retries.stage_timeout(), no_retries.capability_timeout);
    }

    #[test]
    fn llm_config_requires_api_key() {
        let cfg = config(&[]).unwrap();
        assert!(matches!(
            cfg.extract_llm_config(),
            Err(ConfigError::MissingRequired { .. })
        ));

        let cfg = config(&[("OPENAI_API_KEY", "sk-test"), ("MATCH_MODEL", "o4-mini")]).unwrap();
        let llm = cfg.match_llm_config().unwrap();
        assert_eq!(llm.model, "o4-mini");
        assert_eq!(llm.api_key.expose_secret(), "sk-test");
    }

    #[test]
    fn reasoning_effort_only_for_reasoning_models() {
        let cfg = config(&[("MATCH_MODEL", "gpt-4o")]).unwrap();
        assert_eq!(cfg.match_reasoning_effort(), None);
        let cfg = config(&[("MATCH_MODEL", "o3-mini")]).unwrap();
        assert_eq!(cfg.match_reasoning_effort(), Some(ReasoningEffort::Low));
    }

    #[test]
    fn gmail_requires_credentials_and_defaults_recipient() {
        let cfg = config(&[("EMAIL_USER", "me@gmail.com")]).unwrap();
        assert!(matches!(
            cfg.notifier_config(),
            Err(ConfigError::MissingRequired { key, .. }) if key == "EMAIL_PASSWORD"
        ));

        let cfg = config(&[("EMAIL_USER", "me@gmail.com"), ("EMAIL_PASSWORD", "app-pw")]).unwrap();
        match cfg.notifier_config().unwrap() {
            NotifierConfig::Email(email) => {
                assert_eq!(email.to_address, "me@gmail.com");
                assert_eq!(email.smtp_host, "smtp.gmail.com");
                assert_eq!(email.sender_name, "Job Agent");
            }
            other => panic!("expected email config, got {other:?}"),
        }
    }

    #[test]
    fn whatsapp_requires_twilio_settings() {
        let cfg = config(&[
            ("NOTIFICATION_METHOD", "whatsapp"),
            ("TWILIO_ACCOUNT_SID", "AC1"),
            ("TWILIO_AUTH_TOKEN", "tok"),
            ("TWILIO_WHATSAPP_FROM", "whatsapp:+14155238886"),
        ])
        .unwrap();
        assert!(matches!(
            cfg.notifier_config(),
            Err(ConfigError::MissingRequired { key, .. }) if key == "WHATSAPP_TO"
        ));
    }

    #[test]
    fn explicit_cv_path_wins() {
        let cfg = config(&[("CV_PATH", "/tmp/me.pdf")]).unwrap();
        assert_eq!(cfg.resolve_cv_path().unwrap(), PathBuf::from("/tmp/me.pdf"));
    }
}
