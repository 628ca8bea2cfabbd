//! Requirement extraction: posting text → `ExtractedRequirements`.
//!
//! One capability call per job per run. Retries live in the provider
//! wrapper; anything that reaches here as an error skips the job.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::llm::json::extract_json_object;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{ExtractedRequirements, JobPosting, SeniorityLevel, YearsRange};

/// Max tokens for the extraction call.
const EXTRACT_MAX_TOKENS: u32 = 800;

/// Temperature for extraction (deterministic-ish).
const EXTRACT_TEMPERATURE: f32 = 0.1;

/// Description characters sent to the model.
const DESCRIPTION_PREVIEW_CHARS: usize = 6000;

pub struct RequirementExtractor {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl RequirementExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Extract structured requirements from one posting.
    pub async fn extract(
        &self,
        job: &JobPosting,
    ) -> Result<ExtractedRequirements, ExtractionError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extract_system_prompt()),
            ChatMessage::user(build_extract_user_prompt(job)),
        ])
        .with_temperature(EXTRACT_TEMPERATURE)
        .with_max_tokens(EXTRACT_MAX_TOKENS)
        .json();

        let response = tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .map_err(|_| ExtractionError::Timeout(self.timeout))??;

        let requirements = parse_extract_response(&response.content).map_err(|e| {
            warn!(
                job_id = %job.id(),
                raw_response = %response.content,
                error = %e,
                "Failed to parse extraction response"
            );
            ExtractionError::Malformed(e)
        })?;

        debug!(
            job_id = %job.id(),
            required = requirements.required_skills.len(),
            preferred = requirements.preferred_skills.len(),
            seniority = ?requirements.seniority_level,
            "Extracted requirements"
        );
        Ok(requirements)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_extract_system_prompt() -> String {
    "You extract hiring requirements from job postings.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"required_skills\": [\"...\"], \"preferred_skills\": [\"...\"], \
     \"seniority_level\": \"...\", \"years_experience\": {\"min\": 0, \"max\": null}, \
     \"summary\": \"...\"}\n\n\
     Rules:\n\
     - Skills are short names (e.g. \"Rust\", \"Kubernetes\", \"PostgreSQL\"), one per entry\n\
     - required_skills: must-haves; preferred_skills: nice-to-haves\n\
     - seniority_level: one of intern, junior, mid, senior, lead, principal, unspecified\n\
     - years_experience: null when the posting does not say; max null for open-ended (\"5+ years\")\n\
     - summary: one sentence describing the role\n\
     - If the description is empty, infer likely requirements from the title"
        .to_string()
}

fn build_extract_user_prompt(job: &JobPosting) -> String {
    let mut prompt = String::with_capacity(512);

    prompt.push_str(&format!("Title: {}\n", job.title()));
    if !job.company().is_empty() {
        prompt.push_str(&format!("Company: {}\n", job.company()));
    }
    if !job.location().is_empty() {
        prompt.push_str(&format!("Location: {}\n", job.location()));
    }
    prompt.push_str(&format!(
        "Posted: {}\n",
        job.observed_at().format("%Y-%m-%d")
    ));

    if job.description_text().is_empty() {
        prompt.push_str("\nDescription: (none provided, infer requirements from the title)");
    } else {
        let preview: String = job
            .description_text()
            .chars()
            .take(DESCRIPTION_PREVIEW_CHARS)
            .collect();
        prompt.push_str(&format!("\nDescription:\n{preview}"));
    }

    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    required_skills: Vec<String>,
    #[serde(default)]
    preferred_skills: Vec<String>,
    #[serde(default)]
    seniority_level: Option<String>,
    #[serde(default)]
    years_experience: Option<YearsResponse>,
    #[serde(default, alias = "raw_summary")]
    summary: String,
}

#[derive(Debug, serde::Deserialize)]
struct YearsResponse {
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

fn parse_seniority(raw: Option<&str>) -> SeniorityLevel {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("intern" | "internship") => SeniorityLevel::Intern,
        Some("junior" | "entry" | "entry-level" | "graduate") => SeniorityLevel::Junior,
        Some("mid" | "mid-level" | "intermediate") => SeniorityLevel::Mid,
        Some("senior" | "sr") => SeniorityLevel::Senior,
        Some("lead" | "staff") => SeniorityLevel::Lead,
        Some("principal") => SeniorityLevel::Principal,
        _ => SeniorityLevel::Unspecified,
    }
}

fn normalize_skills(raw: Vec<String>) -> BTreeSet<String> {
    raw.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_years(raw: Option<YearsResponse>) -> Option<YearsRange> {
    let raw = raw?;
    let min = raw.min.filter(|v| v.is_finite() && *v >= 0.0)?;
    let max = raw
        .max
        .filter(|v| v.is_finite() && *v >= min)
        .map(|v| v.round() as u32);
    Some(YearsRange {
        min: min.round() as u32,
        max,
    })
}

/// Keys of which at least one must be present for a reply to count as
/// an extraction at all.
const SCHEMA_KEYS: [&str; 4] = ["required_skills", "preferred_skills", "summary", "raw_summary"];

/// Parse the model output into `ExtractedRequirements`.
fn parse_extract_response(raw: &str) -> Result<ExtractedRequirements, String> {
    let json_str = extract_json_object(raw);
    let value: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| format!("JSON parse error: {e}"))?;
    let Some(object) = value.as_object() else {
        return Err(format!("expected a JSON object, got {value}"));
    };
    if !SCHEMA_KEYS.iter().any(|key| object.contains_key(*key)) {
        return Err(format!(
            "no requirement fields in response (expected one of {})",
            SCHEMA_KEYS.join(", ")
        ));
    }
    let response: ExtractResponse =
        serde_json::from_value(value).map_err(|e| format!("JSON parse error: {e}"))?;

    let required_skills = normalize_skills(response.required_skills);
    let mut preferred_skills = normalize_skills(response.preferred_skills);
    preferred_skills.retain(|s| !required_skills.contains(s));

    Ok(ExtractedRequirements {
        required_skills,
        preferred_skills,
        seniority_level: parse_seniority(response.seniority_level.as_deref()),
        years_experience: parse_years(response.years_experience),
        raw_summary: response.summary.trim().to_string(),
    })
}
