// Checkpoint Ledger
// Durable per-work-item record of completed command steps

use crate::execution::work_item::WorkItemId;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("corrupt checkpoint record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl CheckpointError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Highest completed step of one work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub item: WorkItemId,
    pub task: String,
    /// Index of the last step known to have completed
    pub completed_step: usize,
    /// Fingerprint of the resolved command steps the record applies to
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// First step that still has to run
    pub fn resume_point(&self) -> usize {
        self.completed_step + 1
    }
}

/// SHA-256 over the resolved steps, so edited commands invalidate old records
pub fn command_fingerprint(steps: &[String]) -> String {
    let mut hasher = Sha256::new();
    for step in steps {
        hasher.update(step.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Checkpoint store: one JSON file per work item plus an in-memory index.
///
/// Records for different items never share a file or a lock, so concurrent
/// runners only contend on the map shard for the instant of an insert.
pub struct CheckpointLedger {
    dir: PathBuf,
    entries: DashMap<WorkItemId, CheckpointRecord>,
}

impl CheckpointLedger {
    /// Open (creating if needed) a ledger rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CheckpointError::io(&dir, e))?;
        Ok(Self {
            dir,
            entries: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, item: &WorkItemId) -> PathBuf {
        let digest = Sha256::digest(item.as_str().as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }

    /// Look up the record for `item`, reading it from disk on first access
    pub async fn get(&self, item: &WorkItemId) -> Result<Option<CheckpointRecord>, CheckpointError> {
        if let Some(record) = self.entries.get(item) {
            return Ok(Some(record.clone()));
        }

        let path = self.record_path(item);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(&path, e)),
        };
        let record: CheckpointRecord =
            serde_json::from_slice(&content).map_err(|source| CheckpointError::Corrupt {
                path: path.clone(),
                source,
            })?;

        self.entries.insert(item.clone(), record.clone());
        Ok(Some(record))
    }

    /// First step to run for `item`; 0 when there is no usable record.
    ///
    /// A record made for different commands is discarded.
    pub async fn resume_point(&self, item: &WorkItemId, fingerprint: &str) -> Result<usize, CheckpointError> {
        match self.get(item).await? {
            Some(record) if record.fingerprint == fingerprint => {
                tracing::debug!(
                    item = %item,
                    completed_step = record.completed_step,
                    "resuming from checkpoint"
                );
                Ok(record.resume_point())
            }
            Some(_) => {
                tracing::info!(item = %item, "commands changed since checkpoint, restarting");
                self.clear(item).await?;
                Ok(0)
            }
            None => Ok(0),
        }
    }

    /// Record `step_index` as completed. Never moves a record backwards.
    ///
    /// Returns once the record is durable on disk.
    pub async fn record(
        &self,
        item: &WorkItemId,
        task: &str,
        step_index: usize,
        fingerprint: &str,
    ) -> Result<(), CheckpointError> {
        if let Some(existing) = self.get(item).await? {
            if existing.fingerprint == fingerprint && existing.completed_step >= step_index {
                return Ok(());
            }
        }

        let record = CheckpointRecord {
            item: item.clone(),
            task: task.to_string(),
            completed_step: step_index,
            fingerprint: fingerprint.to_string(),
            updated_at: Utc::now(),
        };

        let path = self.record_path(item);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(&record).map_err(|source| CheckpointError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        write_all_synced(file, &content)
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CheckpointError::io(&path, e))?;

        self.entries.insert(item.clone(), record);
        tracing::debug!(item = %item, step = step_index, "checkpointed step");
        Ok(())
    }

    /// Drop the record for `item`. Returns whether one existed.
    pub async fn clear(&self, item: &WorkItemId) -> Result<bool, CheckpointError> {
        self.entries.remove(item);
        let path = self.record_path(item);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CheckpointError::io(&path, e)),
        }
    }

    /// All records on disk, ordered by item
    pub fn list(&self) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        let mut records = Vec::new();
        for path in self.record_files()? {
            let content = std::fs::read(&path).map_err(|e| CheckpointError::io(&path, e))?;
            let record: CheckpointRecord =
                serde_json::from_slice(&content).map_err(|source| CheckpointError::Corrupt {
                    path: path.clone(),
                    source,
                })?;
            records.push(record);
        }
        records.sort_by(|a, b| a.item.cmp(&b.item));
        Ok(records)
    }

    /// Remove every record; returns how many were removed
    pub fn clear_all(&self) -> Result<usize, CheckpointError> {
        let files = self.record_files()?;
        for path in &files {
            std::fs::remove_file(path).map_err(|e| CheckpointError::io(path, e))?;
        }
        self.entries.clear();
        Ok(files.len())
    }

    fn record_files(&self) -> Result<Vec<PathBuf>, CheckpointError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::io(&self.dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| CheckpointError::io(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

async fn write_all_synced(mut file: tokio::fs::File, content: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    file.write_all(content).await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn id(name: &str) -> WorkItemId {
        WorkItemId::from_outputs(&[PathBuf::from(name)])
    }

    #[tokio::test]
    async fn test_record_and_resume() {
        let temp = TempDir::new().unwrap();
        let ledger = CheckpointLedger::open(temp.path()).unwrap();
        let item = id("out/a.bam");

        assert_eq!(ledger.resume_point(&item, "fp").await.unwrap(), 0);

        ledger.record(&item, "map", 0, "fp").await.unwrap();
        ledger.record(&item, "map", 1, "fp").await.unwrap();
        assert_eq!(ledger.resume_point(&item, "fp").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_record_never_regresses() {
        let temp = TempDir::new().unwrap();
        let ledger = CheckpointLedger::open(temp.path()).unwrap();
        let item = id("a");

        ledger.record(&item, "t", 2, "fp").await.unwrap();
        ledger.record(&item, "t", 1, "fp").await.unwrap();
        assert_eq!(ledger.get(&item).await.unwrap().unwrap().completed_step, 2);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let item = id("a");
        {
            let ledger = CheckpointLedger::open(temp.path()).unwrap();
            ledger.record(&item, "t", 1, "fp").await.unwrap();
        }

        let reopened = CheckpointLedger::open(temp.path()).unwrap();
        assert_eq!(reopened.resume_point(&item, "fp").await.unwrap(), 2);
        assert_eq!(reopened.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_changed_fingerprint_restarts() {
        let temp = TempDir::new().unwrap();
        let ledger = CheckpointLedger::open(temp.path()).unwrap();
        let item = id("a");

        ledger.record(&item, "t", 1, "old").await.unwrap();
        assert_eq!(ledger.resume_point(&item, "new").await.unwrap(), 0);
        assert!(ledger.get(&item).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let temp = TempDir::new().unwrap();
        let ledger = CheckpointLedger::open(temp.path()).unwrap();
        let item = id("a");

        ledger.record(&item, "t", 0, "fp").await.unwrap();
        assert!(ledger.clear(&item).await.unwrap());
        assert!(!ledger.clear(&item).await.unwrap());
        assert!(ledger.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_items() {
        let temp = TempDir::new().unwrap();
        let ledger = Arc::new(CheckpointLedger::open(temp.path()).unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let item = id(&format!("out/{}.txt", i));
                for step in 0..3 {
                    ledger.record(&item, "t", step, "fp").await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let records = ledger.list().unwrap();
        assert_eq!(records.len(), 16);
        assert!(records.iter().all(|r| r.completed_step == 2));
        assert_eq!(ledger.clear_all().unwrap(), 16);
    }

    #[tokio::test]
    async fn test_corrupt_record() {
        let temp = TempDir::new().unwrap();
        let ledger = CheckpointLedger::open(temp.path()).unwrap();
        let item = id("a");
        std::fs::write(ledger.record_path(&item), "not json").unwrap();

        assert!(matches!(
            ledger.get(&item).await,
            Err(CheckpointError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_fingerprint() {
        let a = command_fingerprint(&["echo a".to_string(), "echo b".to_string()]);
        let b = command_fingerprint(&["echo a".to_string(), "echo b".to_string()]);
        let c = command_fingerprint(&["echo ab".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
