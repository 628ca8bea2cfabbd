//! Groups a run's passing results into one `NotificationBatch`.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::types::{JobSummary, MatchResult};

/// One job in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub job: JobSummary,
    pub result: MatchResult,
    /// Passed in an earlier run whose dispatch was not confirmed.
    pub carried_over: bool,
}

/// Everything dispatched at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationBatch {
    pub run_id: Uuid,
    pub run_started_at: DateTime<Utc>,
    pub total_candidates_seen: usize,
    pub total_passed: usize,
    pub entries: Vec<BatchEntry>,
}

impl NotificationBatch {
    /// Build a batch ordered by descending score, ties by ascending job id.
    /// Order never depends on the order results arrived in.
    pub fn build(
        run_id: Uuid,
        run_started_at: DateTime<Utc>,
        total_candidates_seen: usize,
        mut entries: Vec<BatchEntry>,
    ) -> Self {
        entries.sort_by(compare_entries);
        Self {
            run_id,
            run_started_at,
            total_candidates_seen,
            total_passed: entries.len(),
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.job.job_id.as_str())
    }
}

fn compare_entries(a: &BatchEntry, b: &BatchEntry) -> Ordering {
    b.result
        .score
        .cmp(&a.result.score)
        .then_with(|| a.job.job_id.cmp(&b.job.job_id))
}
