//! Dry-run dispatcher: logs the batch instead of sending it.

use async_trait::async_trait;

use crate::channels::{Dispatcher, render};
use crate::error::DispatchError;
use crate::pipeline::batcher::NotificationBatch;

#[derive(Debug, Default)]
pub struct LogDispatcher;

impl LogDispatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dispatcher for LogDispatcher {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, batch: &NotificationBatch) -> Result<(), DispatchError> {
        for entry in &batch.entries {
            tracing::info!(
                job_id = %entry.job.job_id,
                score = entry.result.score,
                title = %entry.job.title,
                company = %entry.job.company,
                carried_over = entry.carried_over,
                "[dry run] would notify"
            );
        }
        tracing::debug!(body = %render::plain_text(batch), "[dry run] rendered batch");
        Ok(())
    }
}
