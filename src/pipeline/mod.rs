//! Matching and deduplication pipeline.
//!
//! Every posting in a run flows through:
//! 1. `Deduplicator::check()`: history lookup, no capability call
//! 2. `TitleExclusions::matched()`: optional keyword drop
//! 3. `RequirementExtractor::extract()`: capability call
//! 4. `ProfileMatcher::evaluate()`: capability call
//! 5. `Threshold::passes()`
//! 6. `NotificationBatch::build()`: one batch per run
//!
//! `JobPipeline` drives the stages and owns the history commit protocol.

pub mod batcher;
pub mod dedup;
pub mod extractor;
pub mod filter;
pub mod matcher;
pub mod processor;
pub mod types;

pub use batcher::{BatchEntry, NotificationBatch};
pub use extractor::RequirementExtractor;
pub use filter::{Threshold, TitleExclusions};
pub use matcher::ProfileMatcher;
pub use processor::{DispatchOutcome, JobPipeline, PipelineConfig, RunSummary, SkippedJob};
pub use types::{
    ExtractedRequirements, JobPosting, JobState, JobSummary, MatchResult, RawPosting,
    SeniorityLevel, SkipStage, YearsRange,
};
