//! Error types for the job agent.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Candidate profile (CV) loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Profile file not found: {0}")]
    NotFound(String),

    #[error("Unsupported profile format: {extension} (supported: .txt, .md, .pdf)")]
    UnsupportedFormat { extension: String },

    #[error("Failed to extract text from PDF {path}: {reason}")]
    Pdf { path: String, reason: String },

    #[error("Profile {0} is empty")]
    Empty(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Model {model} not available on provider {provider}")]
    ModelNotAvailable { provider: String, model: String },
}

impl LlmError {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::RateLimited { .. })
    }
}

/// Requirement extraction failures. Per-job and recoverable.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("capability unreachable: {0}")]
    Capability(#[from] LlmError),

    #[error("malformed extraction output: {0}")]
    Malformed(String),

    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
}

/// Profile matching failures. Per-job and recoverable.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("capability unreachable: {0}")]
    Capability(#[from] LlmError),

    #[error("malformed match output: {0}")]
    Malformed(String),

    #[error("score {0} outside 0..=100")]
    ScoreOutOfRange(i64),

    #[error("matching timed out after {0:?}")]
    Timeout(Duration),
}

/// History store failures. Always fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum HistoryStoreError {
    #[error("History store IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("History store {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Unsupported history schema version {found} (max supported {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("History store changed since it was read (expected revision {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Notification dispatch errors. Recoverable: the batch stays pending.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to send batch on {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Invalid address for {channel}: {reason}")]
    InvalidAddress { channel: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Run-level pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("History store unavailable: {0}")]
    Store(#[from] HistoryStoreError),

    #[error("Job {job_id} cannot transition from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_llm_errors() {
        assert!(
            LlmError::RateLimited {
                provider: "openai".into(),
                retry_after: None
            }
            .is_transient()
        );
        assert!(
            LlmError::RequestFailed {
                provider: "openai".into(),
                reason: "connection reset".into()
            }
            .is_transient()
        );
        assert!(
            !LlmError::AuthFailed {
                provider: "openai".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn store_conflict_message_names_revisions() {
        let err = HistoryStoreError::Conflict {
            expected: 3,
            found: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected revision 3"));
        assert!(msg.contains("found 4"));
    }

    #[test]
    fn pipeline_error_wraps_store_error() {
        let err = PipelineError::from(HistoryStoreError::Conflict {
            expected: 1,
            found: 2,
        });
        assert!(matches!(
            err,
            PipelineError::Store(HistoryStoreError::Conflict { expected: 1, found: 2 })
        ));
        assert!(err.to_string().starts_with("History store unavailable"));
    }
}
