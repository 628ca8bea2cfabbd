//! Profile matching: requirements + CV → scored `MatchResult`.
//!
//! Scores are validated, never repaired: anything outside 0..=100 or not
//! an integer is an error and the job is skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::MatchError;
use crate::llm::json::extract_json_object;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider, ReasoningEffort};
use crate::pipeline::types::{ExtractedRequirements, JobPosting, MatchResult, SeniorityLevel};
use crate::profile::CandidateProfile;

/// Max completion tokens for the match call (reasoning models spend part
/// of this budget thinking).
const MATCH_MAX_TOKENS: u32 = 4000;

pub struct ProfileMatcher {
    llm: Arc<dyn LlmProvider>,
    numbered_profile: String,
    reasoning_effort: Option<ReasoningEffort>,
    timeout: Duration,
}

impl ProfileMatcher {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        profile: &CandidateProfile,
        reasoning_effort: Option<ReasoningEffort>,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            numbered_profile: profile.with_paragraph_numbers(),
            reasoning_effort,
            timeout,
        }
    }

    /// Score one posting. `requirements` is moved into the result for audit.
    pub async fn evaluate(
        &self,
        job: &JobPosting,
        requirements: ExtractedRequirements,
    ) -> Result<MatchResult, MatchError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_match_system_prompt()),
            ChatMessage::user(build_match_user_prompt(
                &self.numbered_profile,
                job,
                &requirements,
            )),
        ])
        .with_max_tokens(MATCH_MAX_TOKENS)
        .with_reasoning_effort(self.reasoning_effort)
        .json();

        let response = tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .map_err(|_| MatchError::Timeout(self.timeout))??;

        let parsed = parse_match_response(&response.content).inspect_err(|e| {
            warn!(
                job_id = %job.id(),
                raw_response = %response.content,
                error = %e,
                "Rejected match response"
            );
        })?;

        debug!(
            job_id = %job.id(),
            score = parsed.score,
            strong = parsed.strong_matches.len(),
            gaps = parsed.gaps.len(),
            "Scored job"
        );

        Ok(MatchResult {
            job_id: job.id().to_string(),
            score: parsed.score,
            reasoning: parsed.reasoning,
            strong_matches: parsed.strong_matches,
            gaps: parsed.gaps,
            cv_suggestions: parsed.cv_suggestions,
            requirements,
            evaluated_at: Utc::now(),
        })
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_match_system_prompt() -> String {
    "You evaluate how well a candidate's resume fits a job.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"score\": 0, \"reasoning\": \"...\", \
     \"strong_matches\": [{\"requirement\": \"...\", \"evidence\": \"Paragraph N: ...\"}], \
     \"gaps\": [{\"requirement\": \"...\", \"reason\": \"...\"}], \
     \"cv_suggestions\": [\"...\"]}\n\n\
     Rules:\n\
     - score is an integer from 0 (no fit) to 100 (perfect fit)\n\
     - reasoning: 2-3 sentences, concrete and realistic\n\
     - Cite resume evidence by paragraph number\n\
     - cv_suggestions: short edits that would make the resume fit this job better"
        .to_string()
}

fn build_match_user_prompt(
    numbered_profile: &str,
    job: &JobPosting,
    requirements: &ExtractedRequirements,
) -> String {
    let mut prompt = String::with_capacity(numbered_profile.len() + 1024);

    prompt.push_str("## Resume (with paragraph numbers)\n");
    prompt.push_str(numbered_profile);
    prompt.push_str("\n\n## Job\n");
    prompt.push_str(&format!("Title: {}\n", job.title()));
    if !job.company().is_empty() {
        prompt.push_str(&format!("Company: {}\n", job.company()));
    }
    if !job.location().is_empty() {
        prompt.push_str(&format!("Location: {}\n", job.location()));
    }

    prompt.push_str("\n## Requirements\n");
    let mut listed = false;
    for skill in &requirements.required_skills {
        prompt.push_str(&format!("- {skill} [must]\n"));
        listed = true;
    }
    for skill in &requirements.preferred_skills {
        prompt.push_str(&format!("- {skill} [preferred]\n"));
        listed = true;
    }
    if requirements.seniority_level != SeniorityLevel::Unspecified {
        prompt.push_str(&format!("Seniority: {}\n", requirements.seniority_level));
    }
    if let Some(years) = requirements.years_experience {
        prompt.push_str(&format!("Experience: {years}\n"));
    }
    if !requirements.raw_summary.is_empty() {
        prompt.push_str(&format!("Summary: {}\n", requirements.raw_summary));
    }
    if !listed {
        prompt.push_str(&format!("Infer from title: {}\n", job.title()));
    }

    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct MatchResponse {
    score: Option<Value>,
    #[serde(default, alias = "reasons")]
    reasoning: String,
    #[serde(default)]
    strong_matches: Vec<Value>,
    #[serde(default)]
    partial_matches: Vec<Value>,
    #[serde(default)]
    gaps: Vec<Value>,
    #[serde(default)]
    cv_suggestions: Vec<Value>,
}

#[derive(Debug)]
struct ParsedMatch {
    score: u8,
    reasoning: String,
    strong_matches: Vec<String>,
    gaps: Vec<String>,
    cv_suggestions: Vec<String>,
}

/// Validate the raw score. Integers only; no clamping.
fn parse_score(raw: Option<&Value>) -> Result<u8, MatchError> {
    let value = match raw {
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i
            } else if n.as_u64().is_some() {
                i64::MAX
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if !f.is_finite() || f.fract() != 0.0 {
                    return Err(MatchError::Malformed(format!("score {n} is not an integer")));
                }
                f as i64
            }
        }
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| MatchError::Malformed(format!("score {s:?} is not an integer")))?,
        Some(other) => {
            return Err(MatchError::Malformed(format!("score has wrong type: {other}")));
        }
        None => return Err(MatchError::Malformed("missing score".into())),
    };

    u8::try_from(value)
        .ok()
        .filter(|s| *s <= 100)
        .ok_or(MatchError::ScoreOutOfRange(value))
}

/// Flatten a string-or-object list entry into one line.
fn render_item(item: &Value) -> Option<String> {
    let text = match item {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => {
            let field = |k: &str| {
                map.get(k)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            };
            let head = field("requirement").or_else(|| field("item"))?;
            match field("evidence").or_else(|| field("reason")).or_else(|| field("gap")) {
                Some(detail) => format!("{head} ({detail})"),
                None => head.to_string(),
            }
        }
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn render_items(items: &[Value]) -> Vec<String> {
    items.iter().filter_map(render_item).collect()
}

fn parse_match_response(raw: &str) -> Result<ParsedMatch, MatchError> {
    let json_str = extract_json_object(raw);
    let response: MatchResponse = serde_json::from_str(json_str)
        .map_err(|e| MatchError::Malformed(format!("JSON parse error: {e}")))?;

    let score = parse_score(response.score.as_ref())?;

    let reasoning = response.reasoning.trim().to_string();
    if reasoning.is_empty() {
        return Err(MatchError::Malformed("empty reasoning".into()));
    }

    let mut gaps = render_items(&response.gaps);
    gaps.extend(
        render_items(&response.partial_matches)
            .into_iter()
            .map(|p| format!("partial: {p}")),
    );

    Ok(ParsedMatch {
        score,
        reasoning,
        strong_matches: render_items(&response.strong_matches),
        gaps,
        cv_suggestions: render_items(&response.cv_suggestions),
    })
}
