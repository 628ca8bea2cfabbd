//! Run orchestrator: intake → extract → match → filter → batch → commit →
//! dispatch → confirm.
//!
//! **Core invariant: a job is only marked notified after its batch was
//! accepted by the dispatcher.** History is written in two commits:
//!
//! 1. Before dispatch, every evaluated job is appended with
//!    `notified=false`; passed jobs carry their pending payload.
//! 2. After a successful dispatch, exactly the batch's jobs are flipped
//!    to `notified=true`.
//!
//! If dispatch fails the second commit never happens, and the next run
//! re-sends the stored payloads without calling the capability again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::Dispatcher;
use crate::error::PipelineError;
use crate::llm::TokenUsage;
use crate::pipeline::batcher::{BatchEntry, NotificationBatch};
use crate::pipeline::dedup::Deduplicator;
use crate::pipeline::extractor::RequirementExtractor;
use crate::pipeline::filter::{Threshold, TitleExclusions};
use crate::pipeline::matcher::ProfileMatcher;
use crate::pipeline::types::{JobPosting, JobState, MatchResult, SkipStage};
use crate::store::{HistoryRecord, HistorySnapshot, HistoryStore};

// ── Configuration ───────────────────────────────────────────────────

/// Run-level knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub threshold: Threshold,
    /// Max jobs in extraction/matching at once. Values below 1 act as 1.
    pub concurrency_limit: usize,
    pub exclusions: TitleExclusions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: Threshold::DEFAULT,
            concurrency_limit: 4,
            exclusions: TitleExclusions::default(),
        }
    }
}

// ── Per-job state tracking ──────────────────────────────────────────

/// Current state of every job touched by the run.
#[derive(Debug, Default)]
struct JobTracker {
    states: BTreeMap<String, JobState>,
}

impl JobTracker {
    /// Record the intake state. Intake states are entry points, not
    /// transitions.
    fn admit(&mut self, job_id: &str, state: JobState) {
        self.states.entry(job_id.to_string()).or_insert(state);
    }

    /// A pending notification restored from history re-enters as PASSED.
    fn restore_pending(&mut self, job_id: &str) {
        self.states.insert(job_id.to_string(), JobState::Passed);
    }

    fn transition(&mut self, job_id: &str, to: JobState) -> Result<(), PipelineError> {
        let from = self
            .states
            .get(job_id)
            .copied()
            .ok_or_else(|| PipelineError::InvalidTransition {
                job_id: job_id.to_string(),
                from: "UNKNOWN".into(),
                to: to.to_string(),
            })?;

        if !from.can_transition_to(to) {
            return Err(PipelineError::InvalidTransition {
                job_id: job_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        debug!(job_id, %from, %to, "Job state transition");
        self.states.insert(job_id.to_string(), to);
        Ok(())
    }
}

fn lock(tracker: &Mutex<JobTracker>) -> std::sync::MutexGuard<'_, JobTracker> {
    tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Run summary ─────────────────────────────────────────────────────

/// A job dropped because a capability stage failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedJob {
    pub job_id: String,
    pub stage: SkipStage,
    pub reason: String,
}

/// What happened to the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// No job passed and nothing was pending.
    NothingToSend,
    Sent { channel: String, jobs: usize },
    Failed { channel: String, jobs: usize, reason: String },
}

/// Always produced, even when nothing passed.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub threshold: u8,
    /// Postings in the input, duplicates included.
    pub input: usize,
    /// Already in history, or repeated within this input.
    pub seen: usize,
    pub excluded: usize,
    pub new: usize,
    pub skipped: usize,
    pub evaluated: usize,
    pub passed: usize,
    pub rejected: usize,
    pub carried_over: usize,
    pub notified: usize,
    pub pending: usize,
    pub skipped_jobs: Vec<SkippedJob>,
    pub dispatch: DispatchOutcome,
    pub history_revision: u64,
    pub states: BTreeMap<String, JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl RunSummary {
    pub fn state(&self, job_id: &str) -> Option<JobState> {
        self.states.get(job_id).copied()
    }

    pub fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }

    /// Write as pretty JSON to `<dir>/run_summary_<YYYYmmdd_HHMMSS>.json`.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "run_summary_{}.json",
            self.started_at.format("%Y%m%d_%H%M%S")
        ));
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    fn log(&self) {
        info!(
            run_id = %self.run_id,
            input = self.input,
            seen = self.seen,
            excluded = self.excluded,
            new = self.new,
            skipped = self.skipped,
            passed = self.passed,
            rejected = self.rejected,
            carried_over = self.carried_over,
            notified = self.notified,
            pending = self.pending,
            revision = self.history_revision,
            "Run complete"
        );
        for skipped in &self.skipped_jobs {
            warn!(
                job_id = %skipped.job_id,
                stage = %skipped.stage,
                reason = %skipped.reason,
                "Job skipped"
            );
        }
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

enum Evaluation {
    Matched(MatchResult),
    Skipped { stage: SkipStage, reason: String },
}

/// Everything one run needs. Holds no cross-run state; the history store
/// is the only thing that outlives a run.
pub struct JobPipeline {
    extractor: RequirementExtractor,
    matcher: ProfileMatcher,
    store: Arc<dyn HistoryStore>,
    dispatcher: Arc<dyn Dispatcher>,
    config: PipelineConfig,
}

impl JobPipeline {
    pub fn new(
        extractor: RequirementExtractor,
        matcher: ProfileMatcher,
        store: Arc<dyn HistoryStore>,
        dispatcher: Arc<dyn Dispatcher>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            extractor,
            matcher,
            store,
            dispatcher,
            config,
        }
    }

    /// Like `run`, but gives up when `shutdown` resolves first.
    ///
    /// Returns `Ok(None)` when interrupted. Commits that already landed
    /// stay: jobs without a phase-one record are NEW again next run, and
    /// jobs whose batch was not confirmed are re-sent from history.
    pub async fn run_until<F>(
        &self,
        postings: Vec<JobPosting>,
        shutdown: F,
    ) -> Result<Option<RunSummary>, PipelineError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run(postings) => result.map(Some),
            () = shutdown => {
                warn!("Run interrupted, uncommitted work is redone next run");
                Ok(None)
            }
        }
    }

    /// Run the pipeline over one input sequence.
    ///
    /// Fails only on run-level errors (history unreadable or a commit
    /// rejected). Capability and dispatch failures are reported in the
    /// summary.
    pub async fn run(&self, postings: Vec<JobPosting>) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            postings = postings.len(),
            threshold = self.config.threshold.value(),
            concurrency = self.config.concurrency_limit,
            store = %self.store.describe(),
            "Starting run"
        );

        // Read once. Nothing below calls the capability if this fails.
        let snapshot = self.store.snapshot().await?;
        let input = postings.len();

        // Step 1: intake (dedup + exclusions)
        let tracker = Mutex::new(JobTracker::default());
        let (fresh, seen, excluded) = self.intake(postings, &snapshot, &tracker);

        // Step 2: restore pending notifications from earlier runs
        let carried: Vec<BatchEntry> = snapshot
            .pending_notifications()
            .filter_map(|record| {
                let pending = record.pending.as_ref()?;
                lock(&tracker).restore_pending(&record.job_id);
                Some(BatchEntry {
                    job: pending.job.clone(),
                    result: pending.result.clone(),
                    carried_over: true,
                })
            })
            .collect();
        if !carried.is_empty() {
            info!(count = carried.len(), "Carrying over unconfirmed notifications");
        }

        // Step 3: extraction + matching, bounded fan-out
        let new = fresh.len();
        let limit = self.config.concurrency_limit.max(1);
        let mut evaluations: Vec<(JobPosting, Evaluation)> = stream::iter(fresh)
            .map(|job| {
                let tracker = &tracker;
                async move {
                    let evaluation = self.evaluate(&job, tracker).await?;
                    Ok::<_, PipelineError>((job, evaluation))
                }
            })
            .buffer_unordered(limit)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        // Completion order is arbitrary; everything downstream is not.
        evaluations.sort_by(|a, b| a.0.id().cmp(b.0.id()));

        // Step 4: threshold filter, history records, batch entries
        let mut skipped_jobs = Vec::new();
        let mut records: BTreeMap<String, HistoryRecord> = BTreeMap::new();
        let mut entries = Vec::new();
        let (mut passed, mut rejected) = (0usize, 0usize);

        for (job, evaluation) in evaluations {
            match evaluation {
                Evaluation::Skipped { stage, reason } => skipped_jobs.push(SkippedJob {
                    job_id: job.id().to_string(),
                    stage,
                    reason,
                }),
                Evaluation::Matched(result) => {
                    let pass = self.config.threshold.passes(&result);
                    let state = if pass { JobState::Passed } else { JobState::Rejected };
                    lock(&tracker).transition(job.id(), state)?;
                    info!(
                        job_id = %job.id(),
                        title = %job.title(),
                        score = result.score,
                        passed = pass,
                        "Job evaluated"
                    );

                    records.insert(
                        job.id().to_string(),
                        HistoryRecord::evaluated(job.summary(), &result, pass, started_at),
                    );
                    if pass {
                        passed += 1;
                        entries.push(BatchEntry {
                            job: job.summary(),
                            result,
                            carried_over: false,
                        });
                    } else {
                        rejected += 1;
                    }
                }
            }
        }

        let carried_over = carried.len();
        entries.extend(carried);
        let batch = NotificationBatch::build(run_id, started_at, input, entries);

        // Step 5: phase-one commit, before anything leaves the process
        let mut revision = snapshot.revision();
        let evaluated = records.len();
        if !records.is_empty() {
            revision = self
                .store
                .append_batch(revision, run_id, records.values().cloned().collect())
                .await?;
            debug!(run_id = %run_id, records = evaluated, revision, "Recorded evaluated jobs");
        }

        // Step 6: dispatch + phase-two commit
        let dispatch = if batch.is_empty() {
            info!(run_id = %run_id, "No jobs to notify");
            DispatchOutcome::NothingToSend
        } else {
            self.dispatch(&batch, &snapshot, &records, &tracker, &mut revision)
                .await?
        };

        let (notified, pending) = match &dispatch {
            DispatchOutcome::Sent { jobs, .. } => (*jobs, 0),
            DispatchOutcome::Failed { jobs, .. } => (0, *jobs),
            DispatchOutcome::NothingToSend => (0, 0),
        };

        let states = tracker
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .states;

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            threshold: self.config.threshold.value(),
            input,
            seen,
            excluded,
            new,
            skipped: skipped_jobs.len(),
            evaluated,
            passed,
            rejected,
            carried_over,
            notified,
            pending,
            skipped_jobs,
            dispatch,
            history_revision: revision,
            states,
            token_usage: None,
        };
        summary.log();
        Ok(summary)
    }

    /// Split the input into NEW jobs, counting SEEN and EXCLUDED ones.
    fn intake(
        &self,
        postings: Vec<JobPosting>,
        snapshot: &HistorySnapshot,
        tracker: &Mutex<JobTracker>,
    ) -> (Vec<JobPosting>, usize, usize) {
        let mut dedup = Deduplicator::new(snapshot);
        let mut tracker = lock(tracker);
        let mut fresh = Vec::new();
        let (mut seen, mut excluded) = (0usize, 0usize);

        for job in postings {
            let verdict = dedup.check(job.id());
            if !verdict.is_new() {
                debug!(
                    job_id = %job.id(),
                    title = %job.title(),
                    verdict = ?verdict,
                    "Already seen, skipping"
                );
                tracker.admit(job.id(), JobState::Seen);
                seen += 1;
                continue;
            }

            if let Some(keyword) = self.config.exclusions.matched(job.title()) {
                info!(
                    job_id = %job.id(),
                    title = %job.title(),
                    keyword = %keyword,
                    "Excluded by title keyword"
                );
                tracker.admit(job.id(), JobState::Excluded);
                excluded += 1;
            } else {
                tracker.admit(job.id(), JobState::New);
                fresh.push(job);
            }
        }

        (fresh, seen, excluded)
    }

    /// Extract then match one job. Capability failures become `Skipped`.
    async fn evaluate(
        &self,
        job: &JobPosting,
        tracker: &Mutex<JobTracker>,
    ) -> Result<Evaluation, PipelineError> {
        let id = job.id();

        lock(tracker).transition(id, JobState::Extracting)?;
        let requirements = match self.extractor.extract(job).await {
            Ok(requirements) => requirements,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Extraction failed");
                lock(tracker).transition(id, JobState::Skipped(SkipStage::Extraction))?;
                return Ok(Evaluation::Skipped {
                    stage: SkipStage::Extraction,
                    reason: e.to_string(),
                });
            }
        };
        {
            let mut tracker = lock(tracker);
            tracker.transition(id, JobState::Extracted)?;
            tracker.transition(id, JobState::Matching)?;
        }

        match self.matcher.evaluate(job, requirements).await {
            Ok(result) => {
                lock(tracker).transition(id, JobState::Matched)?;
                Ok(Evaluation::Matched(result))
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "Matching failed");
                lock(tracker).transition(id, JobState::Skipped(SkipStage::Matching))?;
                Ok(Evaluation::Skipped {
                    stage: SkipStage::Matching,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Hand the batch off; on success mark its jobs notified.
    async fn dispatch(
        &self,
        batch: &NotificationBatch,
        snapshot: &HistorySnapshot,
        records: &BTreeMap<String, HistoryRecord>,
        tracker: &Mutex<JobTracker>,
        revision: &mut u64,
    ) -> Result<DispatchOutcome, PipelineError> {
        let channel = self.dispatcher.name().to_string();
        let jobs = batch.len();
        info!(run_id = %batch.run_id, channel = %channel, jobs, "Dispatching batch");

        if let Err(e) = self.dispatcher.send(batch).await {
            error!(
                run_id = %batch.run_id,
                channel = %channel,
                error = %e,
                "Dispatch failed, jobs stay pending for the next run"
            );
            let mut tracker = lock(tracker);
            for id in batch.job_ids() {
                tracker.transition(id, JobState::PendingNotify)?;
            }
            return Ok(DispatchOutcome::Failed {
                channel,
                jobs,
                reason: e.to_string(),
            });
        }

        let now = Utc::now();
        let confirmed: Vec<HistoryRecord> = batch
            .job_ids()
            .filter_map(|id| records.get(id).or_else(|| snapshot.get(id)))
            .map(|record| record.clone().into_notified(now))
            .collect();
        *revision = self
            .store
            .append_batch(*revision, batch.run_id, confirmed)
            .await?;

        let mut tracker = lock(tracker);
        for id in batch.job_ids() {
            tracker.transition(id, JobState::Notified)?;
        }
        Ok(DispatchOutcome::Sent { channel, jobs })
    }
}
