use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::runtime::runner::JobRunner;
use crate::runtime::store::TaskStore;
use crate::runtime::types::{RuntimeError, TaskRecord, TaskStatus};
use crate::services::transcriber::Transcriber;

/// Scheduler tuning, derived from the environment by the server.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker slots (default 3).
    pub max_concurrent_tasks: usize,
    /// Wall-clock ceiling per task; `None` disables the timer.
    pub task_timeout: Option<Duration>,
    /// Where job runners write their output files.
    pub transcriptions_dir: PathBuf,
    /// Pin the transcriber to the CPU.
    pub force_cpu: bool,
}

impl SchedulerConfig {
    /// Admission queue depth: `max_concurrent_tasks × 16`.
    pub fn queue_depth(&self) -> usize {
        self.max_concurrent_tasks * 16
    }
}

/// Admits tasks, bounds concurrent execution, and tracks cancellation.
///
/// A bounded mpsc queue holds admitted task ids in FIFO order. A single
/// dispatch loop pops ids, acquires a slot permit, claims the record
/// (`pending → processing`), and spawns a [`JobRunner`] with the permit moved
/// in. Claiming inside the loop, after the permit, is what yields both the
/// slot bound and the FIFO `started_at` guarantee.
///
/// Cancellation handles are watch senders held in an in-memory registry keyed
/// by task id; the registry does not survive a restart.
#[derive(Clone)]
pub struct Scheduler {
    store: TaskStore,
    queue_tx: mpsc::Sender<String>,
    cancellations: Arc<Mutex<HashMap<String, Arc<watch::Sender<bool>>>>>,
    queue_depth: usize,
}

impl Scheduler {
    /// Recover persisted state and start the dispatch loop.
    ///
    /// Records found in `processing` imply an unclean shutdown and become
    /// `failed("interrupted")`; records in `pending` are re-admitted in
    /// `created_at` order.
    pub async fn start(
        store: TaskStore,
        transcriber: Arc<dyn Transcriber>,
        config: SchedulerConfig,
    ) -> Self {
        if let Err(e) = tokio::fs::create_dir_all(&config.transcriptions_dir).await {
            error!(
                dir = %config.transcriptions_dir.display(),
                error = %e,
                "failed to create transcriptions dir"
            );
        }

        let queue_depth = config.queue_depth();
        let (queue_tx, queue_rx) = mpsc::channel::<String>(queue_depth);
        let scheduler = Self {
            store: store.clone(),
            queue_tx,
            cancellations: Arc::new(Mutex::new(HashMap::new())),
            queue_depth,
        };

        let pending = Self::recover(&store).await;

        let runner = JobRunner::new(
            store,
            transcriber,
            config.transcriptions_dir.clone(),
            config.force_cpu,
        );
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        let loop_cancellations = Arc::clone(&scheduler.cancellations);
        let task_timeout = config.task_timeout;
        tokio::spawn(async move {
            Self::dispatch_loop(queue_rx, semaphore, runner, loop_cancellations, task_timeout).await;
        });

        for task_id in pending {
            if let Err(e) = scheduler.enqueue(&task_id).await {
                warn!(%task_id, error = %e, "could not re-admit pending task after restart");
            }
        }

        scheduler
    }

    /// Scan the store for leftovers of a previous process.
    async fn recover(store: &TaskStore) -> Vec<String> {
        let mut records = store.list().await;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut pending = Vec::new();
        for record in records {
            match record.status {
                TaskStatus::Processing => {
                    warn!(task_id = %record.task_id, "marking interrupted task as failed");
                    let result = store
                        .update(&record.task_id, |r| {
                            r.status = TaskStatus::Failed;
                            r.completed_at = Some(Utc::now());
                            r.error = Some("interrupted".to_owned());
                            Ok(())
                        })
                        .await;
                    if let Err(e) = result {
                        error!(task_id = %record.task_id, error = %e, "failed to mark interrupted task");
                    }
                }
                TaskStatus::Pending => pending.push(record.task_id),
                _ => {}
            }
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "re-admitting pending tasks");
        }
        pending
    }

    /// Admit a created task. Non-blocking: a saturated queue is
    /// [`RuntimeError::QueueFull`].
    pub async fn enqueue(&self, task_id: &str) -> Result<(), RuntimeError> {
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        self.cancellations
            .lock()
            .await
            .insert(task_id.to_owned(), Arc::new(cancel_tx));

        match self.queue_tx.try_send(task_id.to_owned()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.cancellations.lock().await.remove(task_id);
                Err(RuntimeError::QueueFull {
                    capacity: self.queue_depth,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.cancellations.lock().await.remove(task_id);
                Err(RuntimeError::SchedulerShutdown)
            }
        }
    }

    /// Request cancellation of a task. Idempotent.
    ///
    /// A `pending` task is failed synchronously; a `processing` task has its
    /// handle fired and finishes when the runner unwinds; a terminal task is
    /// a no-op. The returned record is the state at the time of the call.
    pub async fn cancel(&self, task_id: &str) -> Result<TaskRecord, RuntimeError> {
        let record = self
            .store
            .get(task_id)
            .await
            .ok_or_else(|| RuntimeError::TaskNotFound {
                task_id: task_id.to_owned(),
            })?;

        match record.status {
            TaskStatus::Pending => {
                let result = self
                    .store
                    .update(task_id, |r| {
                        if r.status != TaskStatus::Pending {
                            return Err(RuntimeError::InvalidTransition {
                                task_id: r.task_id.clone(),
                                from: r.status,
                                to: TaskStatus::Failed,
                            });
                        }
                        r.status = TaskStatus::Failed;
                        r.completed_at = Some(Utc::now());
                        r.error = Some("canceled".to_owned());
                        Ok(())
                    })
                    .await;
                match result {
                    Ok(updated) => {
                        self.cancellations.lock().await.remove(task_id);
                        info!(%task_id, "canceled pending task");
                        Ok(updated)
                    }
                    // Lost the race against the dispatch loop: the task
                    // started while we were looking. Fall through to the
                    // processing path.
                    Err(RuntimeError::InvalidTransition { .. }) => self.fire_handle(task_id).await,
                    Err(e) => Err(e),
                }
            }
            TaskStatus::Processing => self.fire_handle(task_id).await,
            TaskStatus::Completed | TaskStatus::Failed => Ok(record),
        }
    }

    async fn fire_handle(&self, task_id: &str) -> Result<TaskRecord, RuntimeError> {
        if let Some(tx) = self.cancellations.lock().await.get(task_id) {
            let _ = tx.send(true);
            info!(%task_id, "cancellation signaled");
        } else {
            warn!(%task_id, "no cancellation handle for task (already finishing?)");
        }
        self.store
            .get(task_id)
            .await
            .ok_or_else(|| RuntimeError::TaskNotFound {
                task_id: task_id.to_owned(),
            })
    }

    /// Drop a task's cancellation handle, if any. Called by the deletion path.
    pub async fn forget(&self, task_id: &str) {
        self.cancellations.lock().await.remove(task_id);
    }

    async fn dispatch_loop(
        mut queue_rx: mpsc::Receiver<String>,
        semaphore: Arc<Semaphore>,
        runner: JobRunner,
        cancellations: Arc<Mutex<HashMap<String, Arc<watch::Sender<bool>>>>>,
        task_timeout: Option<Duration>,
    ) {
        while let Some(task_id) = queue_rx.recv().await {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let Some(record) = runner.claim(&task_id).await else {
                // Canceled while queued, or otherwise gone.
                cancellations.lock().await.remove(&task_id);
                drop(permit);
                continue;
            };

            let cancel_tx = cancellations.lock().await.get(&task_id).cloned();
            let cancel_rx = match &cancel_tx {
                Some(tx) => tx.subscribe(),
                // Recovered task admitted before the registry entry existed;
                // run it uncancellable rather than not at all.
                None => watch::channel(false).1,
            };

            // The task timeout is enforced by firing the cancellation handle
            // from a timer; a late fire against a finished task is a no-op.
            if let (Some(timeout), Some(tx)) = (task_timeout, cancel_tx) {
                let timer_id = task_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if tx.send(true).is_ok() {
                        warn!(task_id = %timer_id, "task timeout fired");
                    }
                });
            }

            let task_runner = runner.clone();
            let task_cancellations = Arc::clone(&cancellations);
            tokio::spawn(async move {
                task_runner.run(record, cancel_rx).await;
                task_cancellations.lock().await.remove(&task_id);
                drop(permit);
            });
        }
    }
}
