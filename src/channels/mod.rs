//! Outbound dispatch of notification batches.
//!
//! A run hands exactly one non-empty batch to one `Dispatcher`. `Ok(())`
//! means the transport accepted the whole batch; only then is the
//! batch's history marked notified.

pub mod email;
pub mod log;
pub mod render;
pub mod whatsapp;

pub use email::{EmailConfig, EmailDispatcher};
pub use log::LogDispatcher;
pub use whatsapp::{WhatsAppConfig, WhatsAppDispatcher};

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::pipeline::batcher::NotificationBatch;

/// A transport that can deliver a batch.
///
/// Implementations should be safe to call again with the same batch; a
/// failed dispatch is retried with identical contents on the next run.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Channel name for logs and errors.
    fn name(&self) -> &str;

    /// Deliver the batch.
    async fn send(&self, batch: &NotificationBatch) -> Result<(), DispatchError>;
}
