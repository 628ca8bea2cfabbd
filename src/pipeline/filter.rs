//! Threshold filter and intake title exclusions.

use regex::Regex;
use tracing::debug;

use crate::error::ConfigError;
use crate::pipeline::types::MatchResult;

/// Minimum score a job needs to be notified. Validated to 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold(u8);

impl Threshold {
    pub const DEFAULT: Threshold = Threshold(50);

    pub fn new(value: i64) -> Result<Self, ConfigError> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= 100)
            .map(Self)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "MATCH_THRESHOLD".into(),
                message: format!("{value} is outside 0..=100"),
            })
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// `score >= threshold`; equality passes.
    pub fn passes(&self, result: &MatchResult) -> bool {
        result.score >= self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Case-insensitive title keywords that drop a posting at intake.
#[derive(Debug, Clone, Default)]
pub struct TitleExclusions {
    keywords: Vec<String>,
    regex: Option<Regex>,
}

impl TitleExclusions {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let regex = if keywords.is_empty() {
            None
        } else {
            let alternation = keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!("(?i)({alternation})")).ok()
        };

        Self { keywords, regex }
    }

    /// Parse a comma-separated list (`EXCLUDE_TITLE_KEYWORDS`).
    pub fn from_csv(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// The keyword that excludes `title`, if any.
    pub fn matched(&self, title: &str) -> Option<String> {
        let regex = self.regex.as_ref()?;
        let found = regex.find(title)?.as_str().to_lowercase();
        debug!(title, keyword = %found, "Title excluded");
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ExtractedRequirements;
    use chrono::Utc;

    fn result(score: u8) -> MatchResult {
        MatchResult {
            job_id: "job:1".into(),
            score,
            reasoning: "r".into(),
            strong_matches: vec![],
            gaps: vec![],
            cv_suggestions: vec![],
            requirements: ExtractedRequirements::default(),
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn threshold_boundary() {
        let threshold = Threshold::new(70).unwrap();
        assert!(threshold.passes(&result(70)));
        assert!(!threshold.passes(&result(69)));
        assert!(threshold.passes(&result(100)));
    }

    #[test]
    fn threshold_extremes() {
        assert!(Threshold::new(0).unwrap().passes(&result(0)));
        assert!(!Threshold::new(100).unwrap().passes(&result(99)));
    }

    #[test]
    fn threshold_validated() {
        assert!(Threshold::new(-1).is_err());
        assert!(Threshold::new(101).is_err());
        assert_eq!(Threshold::default().value(), 50);
    }

    #[test]
    fn exclusions_match_case_insensitive_substrings() {
        let exclusions = TitleExclusions::from_csv("Senior, lead ,, principal");
        assert_eq!(exclusions.keywords(), &["senior", "lead", "principal"]);
        assert_eq!(
            exclusions.matched("SENIOR Backend Engineer").as_deref(),
            Some("senior")
        );
        assert_eq!(exclusions.matched("Team Leader").as_deref(), Some("lead"));
        assert_eq!(exclusions.matched("Backend Engineer"), None);
    }

    #[test]
    fn empty_exclusions_match_nothing() {
        let exclusions = TitleExclusions::from_csv("");
        assert!(exclusions.is_empty());
        assert_eq!(exclusions.matched("Senior Engineer"), None);
    }

    #[test]
    fn keywords_with_regex_metacharacters() {
        let exclusions = TitleExclusions::new(["c++"]);
        assert_eq!(exclusions.matched("C++ Developer").as_deref(), Some("c++"));
        assert_eq!(exclusions.matched("C Developer"), None);
    }
}
