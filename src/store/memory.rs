//! In-memory `HistoryStore`, used by tests and dry runs.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::HistoryStoreError;
use crate::store::traits::{HistoryRecord, HistorySnapshot, HistoryStore};

#[derive(Default)]
pub struct InMemoryHistoryStore {
    state: Mutex<HistorySnapshot>,
    commits: AtomicUsize,
    fail_commits: AtomicBool,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot (e.g. a copy of the file store for
    /// a dry run).
    pub fn from_snapshot(snapshot: HistorySnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    /// Number of successful `append_batch` calls.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make subsequent commits fail with an IO error.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HistorySnapshot> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn snapshot(&self) -> Result<HistorySnapshot, HistoryStoreError> {
        Ok(self.lock().clone())
    }

    async fn append_batch(
        &self,
        expected_revision: u64,
        run_id: Uuid,
        records: Vec<HistoryRecord>,
    ) -> Result<u64, HistoryStoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(HistoryStoreError::Io {
                path: self.describe(),
                source: std::io::Error::other("commit disabled"),
            });
        }

        let mut state = self.lock();
        if state.revision() != expected_revision {
            return Err(HistoryStoreError::Conflict {
                expected: expected_revision,
                found: state.revision(),
            });
        }
        let revision = state.apply_commit(run_id, records, Utc::now());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commits_are_visible_in_later_snapshots() {
        let store = InMemoryHistoryStore::new();
        let rev = store
            .append_batch(0, Uuid::new_v4(), vec![HistoryRecord::new("a", Utc::now())])
            .await
            .unwrap();
        assert_eq!(rev, 1);
        assert!(store.contains("a").await.unwrap());
        assert_eq!(store.get_all().await.unwrap().len(), 1);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn stale_revision_conflicts() {
        let store = InMemoryHistoryStore::new();
        store.append_batch(0, Uuid::new_v4(), vec![]).await.unwrap();
        let err = store.append_batch(0, Uuid::new_v4(), vec![]).await.unwrap_err();
        assert!(matches!(err, HistoryStoreError::Conflict { expected: 0, found: 1 }));
    }

    #[tokio::test]
    async fn failing_commits_change_nothing() {
        let store = InMemoryHistoryStore::new();
        store.fail_commits(true);
        assert!(
            store
                .append_batch(0, Uuid::new_v4(), vec![HistoryRecord::new("a", Utc::now())])
                .await
                .is_err()
        );
        assert!(!store.contains("a").await.unwrap());
    }
}
