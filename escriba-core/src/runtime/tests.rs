#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::watch;
    use tracing_test::traced_test;

    use crate::runtime::scheduler::{Scheduler, SchedulerConfig};
    use crate::runtime::store::TaskStore;
    use crate::runtime::types::{
        new_task_id, RuntimeError, TaskOptions, TaskRecord, TaskStatus, Variant,
    };
    use crate::services::transcriber::{
        cancelled, TranscribeError, TranscribeOptions, Transcriber,
    };

    // ── Test doubles ──────────────────────────────────────────────────────────

    /// Tracks how many fake transcriptions run at once.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        max: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }

        fn peak(&self) -> usize {
            self.max.load(Ordering::SeqCst)
        }
    }

    /// Scripted transcriber: configurable delay and failure, cancellation
    /// aware, writes a small text file on success.
    struct FakeTranscriber {
        delay: Duration,
        fail: bool,
        gauge: Arc<Gauge>,
        invocations: Arc<AtomicUsize>,
    }

    impl FakeTranscriber {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                fail: false,
                gauge: Arc::new(Gauge::default()),
                invocations: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(delay: Duration) -> Self {
            Self {
                fail: true,
                ..Self::new(delay)
            }
        }
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(
            &self,
            _audio_path: &Path,
            _options: &TranscribeOptions,
            output_path: &Path,
            cancel: watch::Receiver<bool>,
        ) -> Result<(), TranscribeError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.gauge.enter();
            let outcome = tokio::select! {
                _ = tokio::time::sleep(self.delay) => {
                    if self.fail {
                        Err(TranscribeError::Engine("scripted failure".to_owned()))
                    } else {
                        tokio::fs::write(output_path, "ola, mundo\n").await?;
                        Ok(())
                    }
                }
                _ = cancelled(cancel) => Err(TranscribeError::Canceled),
            };
            self.gauge.exit();
            outcome
        }
    }

    // ── Fixtures ──────────────────────────────────────────────────────────────

    fn record(task_id: &str, dir: &Path) -> TaskRecord {
        TaskRecord::new(
            task_id,
            "entrevista.wav",
            dir.join(format!("{task_id}_entrevista.wav")),
            TaskOptions::default(),
        )
    }

    fn config(dir: &Path, max_concurrent_tasks: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_tasks,
            task_timeout: None,
            transcriptions_dir: dir.join("transcriptions"),
            force_cpu: true,
        }
    }

    async fn wait_for_terminal(store: &TaskStore, task_id: &str) -> TaskRecord {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = store.get(task_id).await {
                    if record.status.is_terminal() {
                        break record;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task should reach a terminal state")
    }

    // ── Types tests ───────────────────────────────────────────────────────────

    #[test]
    fn task_id_has_expected_shape() {
        let id = new_task_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3, "date_time_hex: {id}");
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn variants_carry_the_canonical_option_pairs() {
        assert!(!Variant::Limpa.timestamps() && !Variant::Limpa.diarization());
        assert!(Variant::Timestamps.timestamps() && !Variant::Timestamps.diarization());
        assert!(!Variant::Diarization.timestamps() && Variant::Diarization.diarization());
        assert!(Variant::Completa.timestamps() && Variant::Completa.diarization());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(
            serde_json::from_str::<TaskStatus>("\"failed\"").unwrap(),
            TaskStatus::Failed
        );
    }

    // ── Store tests ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn store_create_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;

        let rec = record("t1", dir.path());
        store.create(rec.clone()).await.expect("create");

        let loaded = store.get("t1").await.expect("record exists");
        assert_eq!(loaded.task_id, rec.task_id);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert!(loaded.started_at.is_none());
    }

    #[tokio::test]
    async fn store_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;

        store.create(record("t1", dir.path())).await.unwrap();
        let err = store.create(record("t1", dir.path())).await.unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateTask { .. }));
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn store_create_many_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;

        store.create(record("base_limpa", dir.path())).await.unwrap();

        // One of the four collides, so none of the others may appear.
        let siblings: Vec<TaskRecord> = Variant::ALL
            .iter()
            .map(|v| record(&format!("base_{}", v.suffix()), dir.path()).with_variant(*v))
            .collect();
        let err = store.create_many(siblings).await.unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateTask { .. }));

        assert!(store.get("base_timestamps").await.is_none());
        assert!(store.get("base_diarization").await.is_none());
        assert!(store.get("base_completa").await.is_none());
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn store_create_many_inserts_all_four_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;

        let siblings: Vec<TaskRecord> = Variant::ALL
            .iter()
            .map(|v| {
                record(&format!("base_{}", v.suffix()), dir.path())
                    .with_variant(*v)
                    .with_batch_id("base")
            })
            .collect();
        store.create_many(siblings).await.expect("atomic insert");

        for variant in Variant::ALL {
            let rec = store
                .get(&format!("base_{}", variant.suffix()))
                .await
                .expect("sibling exists");
            assert_eq!(rec.variant, Some(variant));
            assert_eq!(rec.batch_id.as_deref(), Some("base"));
        }
    }

    #[tokio::test]
    async fn store_update_rejected_by_mutator_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        store.create(record("t1", dir.path())).await.unwrap();

        let err = store
            .update("t1", |r| {
                r.status = TaskStatus::Completed;
                Err(RuntimeError::InvalidTransition {
                    task_id: r.task_id.clone(),
                    from: TaskStatus::Pending,
                    to: TaskStatus::Completed,
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidTransition { .. }));
        assert_eq!(store.get("t1").await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn store_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        store.create(record("t1", dir.path())).await.unwrap();

        assert!(store.delete("t1").await.unwrap().is_some());
        assert!(store.delete("t1").await.unwrap().is_none());
        assert!(store.get("t1").await.is_none());
    }

    #[tokio::test]
    async fn store_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = TaskStore::open(dir.path()).await;
            store.create(record("t1", dir.path())).await.unwrap();
            store
                .update("t1", |r| {
                    r.status = TaskStatus::Processing;
                    r.started_at = Some(chrono::Utc::now());
                    Ok(())
                })
                .await
                .unwrap();
            store.create(record("t2", dir.path())).await.unwrap();
        }

        let reopened = TaskStore::open(dir.path()).await;
        let tasks = reopened.list().await;
        assert_eq!(tasks.len(), 2);
        assert_eq!(
            reopened.get("t1").await.unwrap().status,
            TaskStatus::Processing
        );
        assert_eq!(reopened.get("t2").await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn store_unparsable_document_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("tasks.json"), b"{ not json")
            .await
            .unwrap();

        let store = TaskStore::open(dir.path()).await;
        assert!(store.list().await.is_empty());
        // And the store is usable afterwards.
        store.create(record("t1", dir.path())).await.unwrap();
    }

    #[tokio::test]
    async fn store_failed_persist_rolls_back_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        store.create(record("t1", dir.path())).await.unwrap();

        // Break the backing directory out from under the store.
        tokio::fs::remove_dir_all(dir.path()).await.unwrap();

        let err = store.create(record("t2", dir.path())).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Persist(_)));
        assert!(store.get("t2").await.is_none(), "insert must be rolled back");
        assert!(store.get("t1").await.is_some());
    }

    // ── Scheduler / runner tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn single_task_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_millis(20)));
        let scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 3)).await;

        store.create(record("t1", dir.path())).await.unwrap();
        scheduler.enqueue("t1").await.expect("admitted");

        let done = wait_for_terminal(&store, "t1").await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());
        assert!(done.error.is_none());

        let output = done.output_path.expect("output path set");
        assert!(output.exists(), "completed implies the output file exists");
        assert!(output
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("t1_transcricao_"));
    }

    #[tokio::test]
    async fn failed_transcription_records_the_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::failing(Duration::from_millis(10)));
        let scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 1)).await;

        store.create(record("t1", dir.path())).await.unwrap();
        scheduler.enqueue("t1").await.unwrap();

        let done = wait_for_terminal(&store, "t1").await;
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.output_path.is_none());
        assert!(done.error.as_deref().unwrap().contains("scripted failure"));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn processing_never_exceeds_the_slot_bound() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_millis(40)));
        let gauge = Arc::clone(&transcriber.gauge);
        let scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 3)).await;

        let ids: Vec<String> = (0..12).map(|i| format!("t{i:02}")).collect();
        for id in &ids {
            store.create(record(id, dir.path())).await.unwrap();
            scheduler.enqueue(id).await.unwrap();
        }
        for id in &ids {
            wait_for_terminal(&store, id).await;
        }

        assert!(
            gauge.peak() <= 3,
            "at most 3 concurrent transcriptions, saw {}",
            gauge.peak()
        );
    }

    #[tokio::test]
    async fn tasks_start_in_admission_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_millis(15)));
        let scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 1)).await;

        let ids: Vec<String> = (0..5).map(|i| format!("t{i}")).collect();
        for id in &ids {
            store.create(record(id, dir.path())).await.unwrap();
            scheduler.enqueue(id).await.unwrap();
        }

        let mut previous = None;
        for id in &ids {
            let done = wait_for_terminal(&store, id).await;
            let started = done.started_at.expect("started");
            if let Some(prev) = previous {
                assert!(prev <= started, "FIFO start order violated at {id}");
            }
            previous = Some(started);
        }
    }

    #[tokio::test]
    async fn cancel_pending_task_fails_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_secs(10)));
        let invocations = Arc::clone(&transcriber.invocations);
        let scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 1)).await;

        // The first task occupies the only slot; the second stays queued.
        store.create(record("busy", dir.path())).await.unwrap();
        store.create(record("queued", dir.path())).await.unwrap();
        scheduler.enqueue("busy").await.unwrap();
        scheduler.enqueue("queued").await.unwrap();

        // Give the dispatch loop a moment to claim the first task.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let canceled = scheduler.cancel("queued").await.expect("cancel pending");
        assert_eq!(canceled.status, TaskStatus::Failed);
        assert_eq!(canceled.error.as_deref(), Some("canceled"));
        assert!(canceled.started_at.is_none(), "never reached processing");

        // Unblock the slot and make sure the canceled task never ran.
        scheduler.cancel("busy").await.unwrap();
        wait_for_terminal(&store, "busy").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_processing_task_unwinds_to_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_secs(10)));
        let scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 1)).await;

        store.create(record("t1", dir.path())).await.unwrap();
        scheduler.enqueue("t1").await.unwrap();

        // Wait until the runner owns the task.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store.get("t1").await.unwrap().status == TaskStatus::Processing {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task should start");

        let response = scheduler.cancel("t1").await.expect("cancel processing");
        // The cancel response reflects the state at the time of the call.
        assert!(matches!(
            response.status,
            TaskStatus::Processing | TaskStatus::Failed
        ));

        let done = wait_for_terminal(&store, "t1").await;
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("canceled"));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_secs(10)));
        let scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 1)).await;

        store.create(record("busy", dir.path())).await.unwrap();
        store.create(record("queued", dir.path())).await.unwrap();
        scheduler.enqueue("busy").await.unwrap();
        scheduler.enqueue("queued").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let first = scheduler.cancel("queued").await.unwrap();
        let second = scheduler.cancel("queued").await.unwrap();
        assert_eq!(first.status, TaskStatus::Failed);
        assert_eq!(second.status, TaskStatus::Failed);
        assert_eq!(first.error, second.error);
        assert_eq!(first.completed_at, second.completed_at);

        scheduler.cancel("busy").await.unwrap();
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_millis(10)));
        let scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 1)).await;

        let err = scheduler.cancel("missing").await.unwrap_err();
        assert!(matches!(err, RuntimeError::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn saturated_queue_rejects_admission() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_secs(30)));
        let scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 1)).await;

        let mut rejected = 0;
        for i in 0..40 {
            let id = format!("t{i:02}");
            store.create(record(&id, dir.path())).await.unwrap();
            match scheduler.enqueue(&id).await {
                Ok(()) => {}
                Err(RuntimeError::QueueFull { capacity }) => {
                    assert_eq!(capacity, 16);
                    rejected += 1;
                }
                Err(e) => panic!("unexpected admission error: {e}"),
            }
        }
        assert!(rejected > 0, "40 admissions into a depth-16 queue must overflow");
    }

    #[tokio::test]
    async fn duplicate_admission_executes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_millis(20)));
        let invocations = Arc::clone(&transcriber.invocations);
        let scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 2)).await;

        store.create(record("t1", dir.path())).await.unwrap();
        scheduler.enqueue("t1").await.unwrap();
        scheduler.enqueue("t1").await.unwrap();

        wait_for_terminal(&store, "t1").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            invocations.load(Ordering::SeqCst),
            1,
            "claiming must be exclusive per task id"
        );
    }

    #[tokio::test]
    async fn task_timeout_cancels_a_stuck_transcription() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_secs(30)));
        let mut cfg = config(dir.path(), 1);
        cfg.task_timeout = Some(Duration::from_millis(100));
        let scheduler = Scheduler::start(store.clone(), transcriber, cfg).await;

        store.create(record("t1", dir.path())).await.unwrap();
        scheduler.enqueue("t1").await.unwrap();

        let done = wait_for_terminal(&store, "t1").await;
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("canceled"));
    }

    // ── Recovery tests ────────────────────────────────────────────────────────

    #[tokio::test]
    #[traced_test]
    async fn startup_marks_processing_tasks_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = TaskStore::open(dir.path()).await;
            let mut rec = record("t1", dir.path());
            rec.status = TaskStatus::Processing;
            rec.started_at = Some(chrono::Utc::now());
            store.create(rec).await.unwrap();
        }

        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_millis(10)));
        let _scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 1)).await;

        let done = wait_for_terminal(&store, "t1").await;
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("interrupted"));
        assert!(done.completed_at.is_some());
        assert!(logs_contain("marking interrupted task as failed"));
    }

    #[tokio::test]
    async fn startup_reenqueues_pending_tasks_in_created_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = TaskStore::open(dir.path()).await;
            let mut older = record("older", dir.path());
            older.created_at = chrono::Utc::now() - chrono::Duration::seconds(60);
            let newer = record("newer", dir.path());
            store.create(newer).await.unwrap();
            store.create(older).await.unwrap();
        }

        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_millis(15)));
        let _scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 1)).await;

        let older = wait_for_terminal(&store, "older").await;
        let newer = wait_for_terminal(&store, "newer").await;
        assert_eq!(older.status, TaskStatus::Completed);
        assert_eq!(newer.status, TaskStatus::Completed);
        assert!(
            older.started_at.unwrap() <= newer.started_at.unwrap(),
            "recovery must preserve created_at order"
        );
    }

    #[tokio::test]
    async fn terminal_records_are_untouched_by_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let completed_at;
        {
            let store = TaskStore::open(dir.path()).await;
            let mut rec = record("done", dir.path());
            rec.status = TaskStatus::Completed;
            rec.started_at = Some(chrono::Utc::now());
            rec.completed_at = Some(chrono::Utc::now());
            completed_at = rec.completed_at;
            store.create(rec).await.unwrap();
        }

        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_millis(10)));
        let _scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 1)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let rec = store.get("done").await.unwrap();
        assert_eq!(rec.status, TaskStatus::Completed);
        assert_eq!(rec.completed_at, completed_at);
    }

    // ── Sibling independence ──────────────────────────────────────────────────

    #[tokio::test]
    async fn sibling_failure_does_not_affect_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).await;
        let transcriber = Arc::new(FakeTranscriber::new(Duration::from_millis(100)));
        let scheduler =
            Scheduler::start(store.clone(), transcriber, config(dir.path(), 2)).await;

        let siblings: Vec<TaskRecord> = Variant::ALL
            .iter()
            .map(|v| {
                record(&format!("base_{}", v.suffix()), dir.path())
                    .with_variant(*v)
                    .with_batch_id("base")
            })
            .collect();
        store.create_many(siblings).await.unwrap();
        for variant in Variant::ALL {
            scheduler
                .enqueue(&format!("base_{}", variant.suffix()))
                .await
                .unwrap();
        }

        // Cancel one sibling; the other three must still complete.
        scheduler.cancel("base_diarization").await.unwrap();

        let canceled = wait_for_terminal(&store, "base_diarization").await;
        assert_eq!(canceled.status, TaskStatus::Failed);
        for id in ["base_limpa", "base_timestamps", "base_completa"] {
            let done = wait_for_terminal(&store, id).await;
            assert_eq!(done.status, TaskStatus::Completed, "{id} must be unaffected");
        }
    }
}
