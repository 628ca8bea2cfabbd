//! Persistence layer: the run history used for dedup and pending retries.

pub mod history;
pub mod memory;
pub mod traits;

pub use history::JsonHistoryStore;
pub use memory::InMemoryHistoryStore;
pub use traits::{HistoryRecord, HistorySnapshot, HistoryStore, PendingNotification};
