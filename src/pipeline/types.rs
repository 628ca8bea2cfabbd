//! Shared types for the matching pipeline.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::dedup::dedup_key;

// ── Job posting ─────────────────────────────────────────────────────

/// A normalized job posting, as produced by the normalizer.
///
/// Fields are private so the dedup `id` always matches the content it was
/// derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    id: String,
    title: String,
    company: String,
    location: String,
    description_text: String,
    source_url: Option<String>,
    observed_at: DateTime<Utc>,
}

impl JobPosting {
    pub fn new(
        title: impl Into<String>,
        company: impl Into<String>,
        location: impl Into<String>,
        description_text: impl Into<String>,
        source_url: Option<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let title = title.into().trim().to_string();
        let company = company.into().trim().to_string();
        let location = location.into().trim().to_string();
        let source_url = source_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        let id = dedup_key(source_url.as_deref(), &title, &company, &location);
        Self {
            id,
            title,
            company,
            location,
            description_text: description_text.into().trim().to_string(),
            source_url,
            observed_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn company(&self) -> &str {
        &self.company
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn description_text(&self) -> &str {
        &self.description_text
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            title: self.title.clone(),
            company: self.company.clone(),
            location: self.location.clone(),
            source_url: self.source_url.clone(),
        }
    }
}

/// Posting as emitted by the normalizer (no dedup key yet).
#[derive(Debug, Clone, Deserialize)]
pub struct RawPosting {
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, alias = "desc")]
    pub description: String,
    #[serde(default, alias = "url")]
    pub link: Option<String>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl RawPosting {
    pub fn into_posting(self, now: DateTime<Utc>) -> JobPosting {
        JobPosting::new(
            self.title,
            self.company,
            self.location,
            self.description,
            self.link,
            self.observed_at.unwrap_or(now),
        )
    }
}

/// The display fields of a posting, kept with pending notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub source_url: Option<String>,
}

// ── Extracted requirements ──────────────────────────────────────────

/// Seniority level inferred from a posting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeniorityLevel {
    Intern,
    Junior,
    Mid,
    Senior,
    Lead,
    Principal,
    #[default]
    #[serde(other)]
    Unspecified,
}

impl std::fmt::Display for SeniorityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Intern => "intern",
            Self::Junior => "junior",
            Self::Mid => "mid",
            Self::Senior => "senior",
            Self::Lead => "lead",
            Self::Principal => "principal",
            Self::Unspecified => "unspecified",
        };
        f.write_str(label)
    }
}

/// Years-of-experience range, `max` open-ended when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearsRange {
    pub min: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

impl std::fmt::Display for YearsRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max {
            Some(max) if max != self.min => write!(f, "{}-{} years", self.min, max),
            Some(_) => write!(f, "{} years", self.min),
            None => write!(f, "{}+ years", self.min),
        }
    }
}

/// Structured requirements extracted from a posting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRequirements {
    pub required_skills: BTreeSet<String>,
    pub preferred_skills: BTreeSet<String>,
    #[serde(default)]
    pub seniority_level: SeniorityLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years_experience: Option<YearsRange>,
    #[serde(default)]
    pub raw_summary: String,
}

// ── Match result ────────────────────────────────────────────────────

/// Outcome of scoring one posting against the candidate profile.
///
/// `score` is only ever produced by validated parsing, so it is always
/// within 0..=100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub job_id: String,
    pub score: u8,
    pub reasoning: String,
    #[serde(default)]
    pub strong_matches: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub cv_suggestions: Vec<String>,
    #[serde(default)]
    pub requirements: ExtractedRequirements,
    pub evaluated_at: DateTime<Utc>,
}

// ── Per-job state machine ───────────────────────────────────────────

/// Pipeline stage at which a job was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    Extraction,
    Matching,
}

impl std::fmt::Display for SkipStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extraction => write!(f, "extract_fail"),
            Self::Matching => write!(f, "match_fail"),
        }
    }
}

/// State of a job within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Not in history; eligible for evaluation.
    New,
    /// Already in history (or repeated in this run). Terminal.
    Seen,
    /// Title matched an exclusion keyword. Terminal.
    Excluded,
    Extracting,
    Extracted,
    Matching,
    Matched,
    /// Capability failure. Terminal.
    Skipped(SkipStage),
    Passed,
    /// Below threshold. Terminal.
    Rejected,
    /// Included in a batch that was handed off successfully. Terminal.
    Notified,
    /// Passed, but dispatch was not confirmed. Terminal for this run.
    PendingNotify,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (New, Extracting) |
            (Extracting, Extracted) | (Extracting, Skipped(SkipStage::Extraction)) |
            (Extracted, Matching) |
            (Matching, Matched) | (Matching, Skipped(SkipStage::Matching)) |
            (Matched, Passed) | (Matched, Rejected) |
            (Passed, Notified) | (Passed, PendingNotify)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Seen
                | Self::Excluded
                | Self::Skipped(_)
                | Self::Rejected
                | Self::Notified
                | Self::PendingNotify
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Seen => write!(f, "SEEN"),
            Self::Excluded => write!(f, "EXCLUDED"),
            Self::Extracting => write!(f, "EXTRACTING"),
            Self::Extracted => write!(f, "EXTRACTED"),
            Self::Matching => write!(f, "MATCHING"),
            Self::Matched => write!(f, "MATCHED"),
            Self::Skipped(stage) => write!(f, "SKIPPED({stage})"),
            Self::Passed => write!(f, "PASSED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Notified => write!(f, "NOTIFIED"),
            Self::PendingNotify => write!(f, "PENDING_NOTIFY"),
        }
    }
}
