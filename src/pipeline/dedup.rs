//! Dedup keys and the SEEN/NEW intake check.
//!
//! The key is derived once, when a `JobPosting` is built. Equality is an
//! exact string match; there is no fuzzy matching.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::store::HistorySnapshot;

/// Namespace for content-derived keys (postings without a link).
const JOB_KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6a0b_5d3e_8c41_4f7a_9e12_d0c4_b7a2_35f1);

static LINKEDIN_JOB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)linkedin\.com(?:/comm)?/jobs/view/(\d+)").expect("valid regex")
});

/// Canonicalize a posting URL: lowercase scheme/host, drop query,
/// fragment and trailing slash, collapse LinkedIn tracking links.
pub fn canonical_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    if let Some(caps) = LINKEDIN_JOB.captures(url) {
        return Some(format!(
            "https://www.linkedin.com/comm/jobs/view/{}",
            &caps[1]
        ));
    }

    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);

    let canonical = match without_query.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = match rest.find('/') {
                Some(idx) => rest.split_at(idx),
                None => (rest, ""),
            };
            format!(
                "{}://{}{}",
                scheme.to_ascii_lowercase(),
                host.to_ascii_lowercase(),
                path.trim_end_matches('/')
            )
        }
        None => without_query.trim_end_matches('/').to_string(),
    };

    (!canonical.is_empty()).then_some(canonical)
}

fn normalize_field(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Derive the dedup key for a posting.
///
/// `url:<canonical>` when a link is available, otherwise a UUIDv5 over
/// the normalized `title|company|location`.
pub fn dedup_key(source_url: Option<&str>, title: &str, company: &str, location: &str) -> String {
    if let Some(canonical) = source_url.and_then(canonical_url) {
        return format!("url:{canonical}");
    }
    let material = format!(
        "{}|{}|{}",
        normalize_field(title),
        normalize_field(company),
        normalize_field(location)
    );
    format!(
        "job:{}",
        Uuid::new_v5(&JOB_KEY_NAMESPACE, material.as_bytes())
    )
}

/// Intake verdict for one posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    /// Not in history and first occurrence in this run.
    New,
    /// Already recorded in history.
    Seen,
    /// Repeated within the current input sequence.
    DuplicateInRun,
}

impl DedupVerdict {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New)
    }
}

/// Read-only dedup check against a history snapshot.
///
/// Tracks ids already admitted in the current run so a posting repeated
/// across several alert emails is evaluated once.
pub struct Deduplicator<'a> {
    history: &'a HistorySnapshot,
    admitted: HashSet<String>,
}

impl<'a> Deduplicator<'a> {
    pub fn new(history: &'a HistorySnapshot) -> Self {
        Self {
            history,
            admitted: HashSet::new(),
        }
    }

    pub fn check(&mut self, job_id: &str) -> DedupVerdict {
        if self.history.contains(job_id) {
            return DedupVerdict::Seen;
        }
        if !self.admitted.insert(job_id.to_string()) {
            return DedupVerdict::DuplicateInRun;
        }
        DedupVerdict::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::HistoryRecord;
    use chrono::Utc;

    #[test]
    fn linkedin_tracking_links_collapse() {
        let a = canonical_url(
            "https://www.linkedin.com/comm/jobs/view/3912345678/?trackingId=abc&refId=xyz",
        );
        let b = canonical_url("https://linkedin.com/jobs/view/3912345678");
        assert_eq!(a.as_deref(), Some("https://www.linkedin.com/comm/jobs/view/3912345678"));
        assert_eq!(a, b);
    }

    #[test]
    fn generic_url_canonicalization() {
        assert_eq!(
            canonical_url("HTTPS://Jobs.Example.COM/Role/42/?utm_source=x#apply").as_deref(),
            Some("https://jobs.example.com/Role/42")
        );
        assert_eq!(canonical_url("   "), None);
    }

    #[test]
    fn content_key_ignores_case_and_spacing() {
        let a = dedup_key(None, "Rust  Engineer", "Ferrous", "Berlin");
        let b = dedup_key(None, "rust engineer", " FERROUS ", "berlin");
        assert_eq!(a, b);
        assert!(a.starts_with("job:"));
        assert_ne!(a, dedup_key(None, "Rust Engineer", "Ferrous", "Munich"));
    }

    #[test]
    fn url_key_preferred_over_content() {
        let key = dedup_key(Some("https://a.io/j/1"), "x", "y", "z");
        assert_eq!(key, "url:https://a.io/j/1");
    }

    #[test]
    fn deduplicator_verdicts() {
        let mut snapshot = HistorySnapshot::empty();
        snapshot.insert(HistoryRecord::new("url:https://a.io/j/1", Utc::now()));
        let mut dedup = Deduplicator::new(&snapshot);

        assert_eq!(dedup.check("url:https://a.io/j/1"), DedupVerdict::Seen);
        assert_eq!(dedup.check("url:https://a.io/j/2"), DedupVerdict::New);
        assert_eq!(dedup.check("url:https://a.io/j/2"), DedupVerdict::DuplicateInRun);
        assert!(!DedupVerdict::Seen.is_new());
    }
}
