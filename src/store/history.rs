//! File-backed `HistoryStore`: one JSON document, replaced atomically.
//!
//! Layout:
//!
//! ```json
//! { "schema_version": 2, "revision": 7, "updated_at": "...",
//!   "last_run_id": "...", "records": { "<job id>": { ... } } }
//! ```
//!
//! Files written by the earlier tool (`{"sent_jobs": [<links>]}`) are read
//! as schema version 1 and rewritten in the current layout on the next
//! commit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::HistoryStoreError;
use crate::pipeline::dedup::canonical_url;
use crate::store::traits::{HistoryRecord, HistorySnapshot, HistoryStore};

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default = "current_schema")]
    schema_version: u32,
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_run_id: Option<Uuid>,
    #[serde(default)]
    records: BTreeMap<String, HistoryRecord>,
}

fn current_schema() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Deserialize)]
struct LegacyHistoryFile {
    #[serde(default)]
    sent_jobs: Vec<String>,
}

/// JSON history store at a fixed path.
pub struct JsonHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> HistoryStoreError {
        HistoryStoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> HistoryStoreError {
        HistoryStoreError::Corrupt {
            path: self.path.display().to_string(),
            reason: reason.into(),
        }
    }

    async fn read(&self) -> Result<HistorySnapshot, HistoryStoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No history file yet, starting empty");
                return Ok(HistorySnapshot::empty());
            }
            Err(e) => return Err(self.io_err(e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(HistorySnapshot::empty());
        }

        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| self.corrupt(e.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(self.corrupt("top-level value is not an object"));
        };

        if object.contains_key("sent_jobs") && !object.contains_key("records") {
            let legacy: LegacyHistoryFile =
                serde_json::from_value(value).map_err(|e| self.corrupt(e.to_string()))?;
            return Ok(self.migrate_legacy(legacy));
        }

        let file: HistoryFile =
            serde_json::from_value(value).map_err(|e| self.corrupt(e.to_string()))?;
        if file.schema_version > SCHEMA_VERSION {
            return Err(HistoryStoreError::UnsupportedVersion {
                found: file.schema_version,
                supported: SCHEMA_VERSION,
            });
        }

        Ok(HistorySnapshot::from_parts(
            file.revision,
            file.last_run_id,
            file.updated_at,
            file.records,
        ))
    }

    /// Every link in the old sent list was notified; keep it that way.
    fn migrate_legacy(&self, legacy: LegacyHistoryFile) -> HistorySnapshot {
        let now = Utc::now();
        let mut records = BTreeMap::new();
        for link in legacy.sent_jobs {
            let Some(canonical) = canonical_url(&link) else {
                continue;
            };
            let id = format!("url:{canonical}");
            records
                .entry(id.clone())
                .or_insert_with(|| HistoryRecord::new(id, now).into_notified(now));
        }
        tracing::info!(
            path = %self.path.display(),
            records = records.len(),
            "Migrating legacy sent-jobs history"
        );
        HistorySnapshot::from_parts(0, None, None, records)
    }

    async fn write_atomic(&self, file: &HistoryFile) -> Result<(), HistoryStoreError> {
        let json = serde_json::to_vec_pretty(file)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "history.json".to_string());
        let tmp_path = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

        let result = async {
            let mut tmp = tokio::fs::File::create(&tmp_path).await?;
            tmp.write_all(&json).await?;
            tmp.sync_all().await?;
            drop(tmp);
            tokio::fs::rename(&tmp_path, &self.path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(self.io_err(e));
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for JsonHistoryStore {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn snapshot(&self) -> Result<HistorySnapshot, HistoryStoreError> {
        self.read().await
    }

    async fn append_batch(
        &self,
        expected_revision: u64,
        run_id: Uuid,
        records: Vec<HistoryRecord>,
    ) -> Result<u64, HistoryStoreError> {
        let _guard = self.write_lock.lock().await;

        // Re-read under the lock so a commit from another process since
        // our snapshot is detected rather than overwritten.
        let mut current = self.read().await?;
        if current.revision() != expected_revision {
            return Err(HistoryStoreError::Conflict {
                expected: expected_revision,
                found: current.revision(),
            });
        }

        let count = records.len();
        let now = Utc::now();
        let revision = current.apply_commit(run_id, records, now);
        let file = HistoryFile {
            schema_version: SCHEMA_VERSION,
            revision,
            updated_at: current.updated_at(),
            last_run_id: current.last_run_id(),
            records: current.into_records(),
        };
        self.write_atomic(&file).await?;

        tracing::debug!(
            path = %self.path.display(),
            run_id = %run_id,
            records = count,
            revision,
            "History batch committed"
        );
        Ok(revision)
    }
}
