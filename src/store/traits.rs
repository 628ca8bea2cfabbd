//! `HistoryStore` trait and the records it persists.
//!
//! A run reads one `HistorySnapshot` at start and commits whole batches
//! against the revision it read. Records are never deleted; after
//! creation the only permitted update is `notified: false → true`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HistoryStoreError;
use crate::pipeline::types::{JobSummary, MatchResult};

/// A passed job whose dispatch has not been confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingNotification {
    pub job: JobSummary,
    pub result: MatchResult,
}

/// One record per unique job ever evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub job_id: String,
    pub first_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub last_score: Option<u8>,
    #[serde(default)]
    pub notified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingNotification>,
}

impl HistoryRecord {
    /// Minimal record: seen, not notified.
    pub fn new(job_id: impl Into<String>, first_seen_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            first_seen_at,
            last_score: None,
            notified: false,
            notified_at: None,
            job: None,
            pending: None,
        }
    }

    /// Record for an evaluated job. Passed jobs keep their result so a
    /// failed dispatch can be retried without re-matching.
    pub fn evaluated(
        job: JobSummary,
        result: &MatchResult,
        passed: bool,
        first_seen_at: DateTime<Utc>,
    ) -> Self {
        let pending = passed.then(|| PendingNotification {
            job: job.clone(),
            result: result.clone(),
        });
        Self {
            job_id: job.job_id.clone(),
            first_seen_at,
            last_score: Some(result.score),
            notified: false,
            notified_at: None,
            job: Some(job),
            pending,
        }
    }

    /// The same record with dispatch confirmed.
    pub fn into_notified(mut self, at: DateTime<Utc>) -> Self {
        self.notified = true;
        self.notified_at = Some(at);
        self.pending = None;
        self
    }

    pub fn is_pending_notify(&self) -> bool {
        !self.notified && self.pending.is_some()
    }
}

/// Point-in-time view of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    revision: u64,
    last_run_id: Option<Uuid>,
    updated_at: Option<DateTime<Utc>>,
    records: BTreeMap<String, HistoryRecord>,
}

impl HistorySnapshot {
    /// An empty store (first run).
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        revision: u64,
        last_run_id: Option<Uuid>,
        updated_at: Option<DateTime<Utc>>,
        records: BTreeMap<String, HistoryRecord>,
    ) -> Self {
        Self {
            revision,
            last_run_id,
            updated_at,
            records,
        }
    }

    pub(crate) fn into_records(self) -> BTreeMap<String, HistoryRecord> {
        self.records
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_run_id(&self) -> Option<Uuid> {
        self.last_run_id
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.records.contains_key(job_id)
    }

    pub fn get(&self, job_id: &str) -> Option<&HistoryRecord> {
        self.records.get(job_id)
    }

    /// All records, ordered by job id.
    pub fn get_all(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records that passed in an earlier run but were never confirmed sent.
    pub fn pending_notifications(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.values().filter(|r| r.is_pending_notify())
    }

    /// Insert a record unless the id already exists.
    pub fn insert(&mut self, record: HistoryRecord) {
        self.records.entry(record.job_id.clone()).or_insert(record);
    }

    /// Merge one incoming record.
    ///
    /// New ids are inserted as-is. For existing ids only the
    /// `notified` flag can flip to true (clearing `pending`); everything
    /// else is immutable once written.
    pub fn merge(&mut self, incoming: HistoryRecord) {
        match self.records.get_mut(&incoming.job_id) {
            None => {
                self.records.insert(incoming.job_id.clone(), incoming);
            }
            Some(existing) => {
                if incoming.notified && !existing.notified {
                    existing.notified = true;
                    existing.notified_at = incoming.notified_at.or_else(|| Some(Utc::now()));
                    existing.pending = None;
                }
            }
        }
    }

    /// Apply a committed batch and advance the revision.
    pub(crate) fn apply_commit(
        &mut self,
        run_id: Uuid,
        records: Vec<HistoryRecord>,
        at: DateTime<Utc>,
    ) -> u64 {
        for record in records {
            self.merge(record);
        }
        self.revision += 1;
        self.last_run_id = Some(run_id);
        self.updated_at = Some(at);
        self.revision
    }
}

/// Persisted run history, the single source of dedup truth.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Read the whole store. A store that does not exist yet is empty.
    async fn snapshot(&self) -> Result<HistorySnapshot, HistoryStoreError>;

    /// Atomically merge `records`, provided the store is still at
    /// `expected_revision`. Returns the new revision.
    async fn append_batch(
        &self,
        expected_revision: u64,
        run_id: Uuid,
        records: Vec<HistoryRecord>,
    ) -> Result<u64, HistoryStoreError>;

    async fn contains(&self, job_id: &str) -> Result<bool, HistoryStoreError> {
        Ok(self.snapshot().await?.contains(job_id))
    }

    async fn get_all(&self) -> Result<Vec<HistoryRecord>, HistoryStoreError> {
        Ok(self.snapshot().await?.into_records().into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ExtractedRequirements;

    fn summary(id: &str) -> JobSummary {
        JobSummary {
            job_id: id.to_string(),
            title: "Rust Engineer".into(),
            company: "Ferrous".into(),
            location: "Remote".into(),
            source_url: None,
        }
    }

    fn result(id: &str, score: u8) -> MatchResult {
        MatchResult {
            job_id: id.to_string(),
            score,
            reasoning: "fits".into(),
            strong_matches: vec![],
            gaps: vec![],
            cv_suggestions: vec![],
            requirements: ExtractedRequirements::default(),
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn evaluated_record_keeps_pending_only_when_passed() {
        let passed = HistoryRecord::evaluated(summary("a"), &result("a", 80), true, Utc::now());
        assert!(passed.is_pending_notify());
        assert_eq!(passed.last_score, Some(80));

        let rejected = HistoryRecord::evaluated(summary("b"), &result("b", 10), false, Utc::now());
        assert!(!rejected.is_pending_notify());
    }

    #[test]
    fn merge_only_flips_notified() {
        let first_seen = Utc::now() - chrono::Duration::days(2);
        let mut snapshot = HistorySnapshot::empty();
        snapshot.merge(HistoryRecord::evaluated(
            summary("a"),
            &result("a", 80),
            true,
            first_seen,
        ));

        // A later record with a different score does not overwrite.
        let mut later = HistoryRecord::evaluated(summary("a"), &result("a", 20), false, Utc::now());
        later.notified = false;
        snapshot.merge(later);
        let rec = snapshot.get("a").unwrap();
        assert_eq!(rec.last_score, Some(80));
        assert_eq!(rec.first_seen_at, first_seen);
        assert!(rec.is_pending_notify());

        // Confirmation flips the flag and clears pending.
        let confirmed = rec.clone().into_notified(Utc::now());
        snapshot.merge(confirmed);
        let rec = snapshot.get("a").unwrap();
        assert!(rec.notified);
        assert!(rec.pending.is_none());

        // notified never goes back to false.
        snapshot.merge(HistoryRecord::new("a", Utc::now()));
        assert!(snapshot.get("a").unwrap().notified);
    }

    #[test]
    fn apply_commit_advances_revision() {
        let mut snapshot = HistorySnapshot::empty();
        let run = Uuid::new_v4();
        let rev = snapshot.apply_commit(run, vec![HistoryRecord::new("x", Utc::now())], Utc::now());
        assert_eq!(rev, 1);
        assert_eq!(snapshot.last_run_id(), Some(run));
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.pending_notifications().next().is_none());
    }
}
