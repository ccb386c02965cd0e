use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::runtime::types::{RuntimeError, TaskRecord};

/// File name of the persisted task document inside the transcriptions dir.
const TASKS_FILE: &str = "tasks.json";

/// Durable, concurrent-safe map of `task_id → TaskRecord`.
///
/// Every mutation rewrites the complete JSON document to a temporary file and
/// renames it into place (atomic replace on POSIX). A single process-wide
/// mutex serializes mutations; readers take the same lock briefly and clone
/// out a snapshot.
///
/// If a persist fails, the in-memory map is rolled back so the on-disk and
/// in-memory views never diverge.
#[derive(Debug, Clone)]
pub struct TaskStore {
    inner: Arc<Mutex<HashMap<String, TaskRecord>>>,
    path: Arc<PathBuf>,
}

impl TaskStore {
    /// Open (or create) the store backed by `{dir}/tasks.json`.
    ///
    /// If `dir` is not writable the store falls back to a directory under the
    /// system temp dir and logs a warning. A missing or unparsable document
    /// starts the store empty; it never fails open.
    pub async fn open(dir: &Path) -> Self {
        let path = Self::resolve_path(dir).await;
        let tasks = Self::load(&path).await;
        Self {
            inner: Arc::new(Mutex::new(tasks)),
            path: Arc::new(path),
        }
    }

    /// The resolved path of the persisted document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn resolve_path(dir: &Path) -> PathBuf {
        let probe = async {
            tokio::fs::create_dir_all(dir).await?;
            // Probe writability without truncating an existing document.
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(TASKS_FILE))
                .await?;
            Ok::<_, std::io::Error>(())
        };
        match probe.await {
            Ok(()) => dir.join(TASKS_FILE),
            Err(e) => {
                let fallback = std::env::temp_dir().join("escriba_tasks");
                warn!(
                    dir = %dir.display(),
                    fallback = %fallback.display(),
                    error = %e,
                    "task directory not writable, falling back to temp dir"
                );
                if let Err(e) = tokio::fs::create_dir_all(&fallback).await {
                    error!(error = %e, "failed to create fallback task dir");
                }
                fallback.join(TASKS_FILE)
            }
        }
    }

    async fn load(path: &Path) -> HashMap<String, TaskRecord> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) if contents.trim().is_empty() => HashMap::new(),
            Ok(contents) => match serde_json::from_str::<HashMap<String, TaskRecord>>(&contents) {
                Ok(tasks) => {
                    info!(count = tasks.len(), path = %path.display(), "loaded persisted tasks");
                    tasks
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "unparsable task document, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read task document, starting empty");
                HashMap::new()
            }
        }
    }

    /// Serialize the full map and atomically replace the on-disk document.
    ///
    /// Must be called while holding the store mutex.
    async fn persist(&self, tasks: &HashMap<String, TaskRecord>) -> Result<(), RuntimeError> {
        let body = serde_json::to_vec_pretty(tasks)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(RuntimeError::Persist)?;
        tokio::fs::rename(&tmp, self.path.as_ref())
            .await
            .map_err(RuntimeError::Persist)
    }

    /// Insert a new record; fails with [`RuntimeError::DuplicateTask`] if the
    /// id is already present.
    pub async fn create(&self, record: TaskRecord) -> Result<(), RuntimeError> {
        let mut tasks = self.inner.lock().await;
        if tasks.contains_key(&record.task_id) {
            return Err(RuntimeError::DuplicateTask {
                task_id: record.task_id,
            });
        }
        let task_id = record.task_id.clone();
        tasks.insert(task_id.clone(), record);
        if let Err(e) = self.persist(&tasks).await {
            tasks.remove(&task_id);
            return Err(e);
        }
        Ok(())
    }

    /// Atomic multi-insert: either all records appear or none do.
    ///
    /// Used by the video fan-out so no observer ever sees a partial sibling
    /// set.
    pub async fn create_many(&self, records: Vec<TaskRecord>) -> Result<(), RuntimeError> {
        let mut tasks = self.inner.lock().await;
        if let Some(dup) = records.iter().find(|r| tasks.contains_key(&r.task_id)) {
            return Err(RuntimeError::DuplicateTask {
                task_id: dup.task_id.clone(),
            });
        }
        let ids: Vec<String> = records.iter().map(|r| r.task_id.clone()).collect();
        for record in records {
            tasks.insert(record.task_id.clone(), record);
        }
        if let Err(e) = self.persist(&tasks).await {
            for id in &ids {
                tasks.remove(id);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Return a snapshot of a single record.
    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.lock().await.get(task_id).cloned()
    }

    /// Snapshot of all records. Iteration order is not guaranteed.
    pub async fn list(&self) -> Vec<TaskRecord> {
        self.inner.lock().await.values().cloned().collect()
    }

    /// Read-modify-write a record under the store mutex.
    ///
    /// The mutator runs on a scratch copy; it is responsible for respecting
    /// the state-machine invariants and may reject the update by returning an
    /// error, in which case nothing changes. A persist failure also rolls the
    /// map back. On success the updated record is returned.
    pub async fn update<F>(&self, task_id: &str, mutate: F) -> Result<TaskRecord, RuntimeError>
    where
        F: FnOnce(&mut TaskRecord) -> Result<(), RuntimeError>,
    {
        let mut tasks = self.inner.lock().await;
        let previous = tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| RuntimeError::TaskNotFound {
                task_id: task_id.to_owned(),
            })?;

        let mut updated = previous.clone();
        mutate(&mut updated)?;

        tasks.insert(task_id.to_owned(), updated.clone());
        if let Err(e) = self.persist(&tasks).await {
            tasks.insert(task_id.to_owned(), previous);
            return Err(e);
        }
        Ok(updated)
    }

    /// Remove a record, returning it if it existed. Idempotent: deleting an
    /// unknown id is `Ok(None)`.
    pub async fn delete(&self, task_id: &str) -> Result<Option<TaskRecord>, RuntimeError> {
        let mut tasks = self.inner.lock().await;
        let Some(removed) = tasks.remove(task_id) else {
            return Ok(None);
        };
        if let Err(e) = self.persist(&tasks).await {
            tasks.insert(task_id.to_owned(), removed);
            return Err(e);
        }
        Ok(Some(removed))
    }
}
