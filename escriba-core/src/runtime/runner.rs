use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::runtime::store::TaskStore;
use crate::runtime::types::{RuntimeError, TaskRecord, TaskStatus};
use crate::services::transcriber::{TranscribeError, TranscribeOptions, Transcriber};

/// Executes a single claimed task end-to-end.
///
/// The runner is the only component that moves a record out of `pending`;
/// every transition it makes goes through [`TaskStore`] under its mutex.
#[derive(Clone)]
pub(crate) struct JobRunner {
    store: TaskStore,
    transcriber: Arc<dyn Transcriber>,
    transcriptions_dir: PathBuf,
    force_cpu: bool,
}

impl JobRunner {
    pub(crate) fn new(
        store: TaskStore,
        transcriber: Arc<dyn Transcriber>,
        transcriptions_dir: PathBuf,
        force_cpu: bool,
    ) -> Self {
        Self {
            store,
            transcriber,
            transcriptions_dir,
            force_cpu,
        }
    }

    /// Atomically transition `pending → processing` and set `started_at`.
    ///
    /// Returns `None` when the record is gone or no longer pending (a
    /// canceled-while-queued task surfaces here and is skipped).
    pub(crate) async fn claim(&self, task_id: &str) -> Option<TaskRecord> {
        let result = self
            .store
            .update(task_id, |record| {
                if record.status != TaskStatus::Pending {
                    return Err(RuntimeError::InvalidTransition {
                        task_id: record.task_id.clone(),
                        from: record.status,
                        to: TaskStatus::Processing,
                    });
                }
                record.status = TaskStatus::Processing;
                record.started_at = Some(Utc::now());
                Ok(())
            })
            .await;

        match result {
            Ok(record) => Some(record),
            Err(RuntimeError::InvalidTransition { task_id, from, .. }) => {
                info!(%task_id, from = from.as_str(), "skipping task no longer pending");
                None
            }
            Err(RuntimeError::TaskNotFound { task_id }) => {
                warn!(%task_id, "queued task vanished before execution");
                None
            }
            Err(e) => {
                error!(%task_id, error = %e, "failed to claim task");
                None
            }
        }
    }

    /// Run a claimed record through the transcriber and finalize it.
    pub(crate) async fn run(&self, record: TaskRecord, cancel: watch::Receiver<bool>) {
        let task_id = record.task_id.clone();
        let output_path = self.transcriptions_dir.join(format!(
            "{}_transcricao_{}.{}",
            task_id,
            Utc::now().format("%Y%m%d_%H%M%S"),
            record.options.output_format.extension()
        ));

        let options = TranscribeOptions {
            timestamps: record.options.timestamps,
            diarization: record.options.diarization,
            model: record.options.model.clone(),
            force_cpu: self.force_cpu,
        };

        info!(%task_id, audio = %record.source_path.display(), "transcription started");

        let result = self
            .transcriber
            .transcribe(&record.source_path, &options, &output_path, cancel)
            .await;

        match result {
            Ok(()) => {
                info!(%task_id, output = %output_path.display(), "transcription completed");
                self.finalize(&task_id, |r| {
                    r.status = TaskStatus::Completed;
                    r.completed_at = Some(Utc::now());
                    r.output_path = Some(output_path.clone());
                })
                .await;
            }
            Err(TranscribeError::Canceled) => {
                info!(%task_id, "transcription canceled");
                self.discard_partial(&output_path).await;
                self.finalize(&task_id, |r| {
                    r.status = TaskStatus::Failed;
                    r.completed_at = Some(Utc::now());
                    r.error = Some("canceled".to_owned());
                })
                .await;
            }
            Err(e) => {
                let message = redact(&e.to_string(), &[&record.source_path, &output_path]);
                error!(%task_id, error = %e, "transcription failed");
                self.discard_partial(&output_path).await;
                self.finalize(&task_id, |r| {
                    r.status = TaskStatus::Failed;
                    r.completed_at = Some(Utc::now());
                    r.error = Some(message.clone());
                })
                .await;
            }
        }
    }

    async fn finalize(&self, task_id: &str, apply: impl FnOnce(&mut TaskRecord)) {
        let result = self
            .store
            .update(task_id, |record| {
                if record.status != TaskStatus::Processing {
                    return Err(RuntimeError::InvalidTransition {
                        task_id: record.task_id.clone(),
                        from: record.status,
                        to: TaskStatus::Failed,
                    });
                }
                apply(record);
                Ok(())
            })
            .await;
        if let Err(e) = result {
            error!(%task_id, error = %e, "failed to persist terminal transition");
        }
    }

    /// Best-effort removal of a partially written output file.
    async fn discard_partial(&self, output_path: &Path) {
        match tokio::fs::remove_file(output_path).await {
            Ok(()) => warn!(output = %output_path.display(), "removed partial output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(output = %output_path.display(), error = %e, "failed to remove partial output"),
        }
    }
}

/// Strip directory prefixes from an error message so stored errors do not
/// leak filesystem layout; file names are kept.
fn redact(message: &str, paths: &[&Path]) -> String {
    let mut out = message.to_owned();
    for path in paths {
        if let Some(parent) = path.parent().and_then(|p| p.to_str()) {
            if !parent.is_empty() && parent != "/" {
                out = out.replace(&format!("{parent}/"), "");
                out = out.replace(parent, "");
            }
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn redact_strips_directory_prefixes() {
        let msg = "failed to open /var/data/audios/abc_call.wav for reading";
        let redacted = redact(msg, &[Path::new("/var/data/audios/abc_call.wav")]);
        assert_eq!(redacted, "failed to open abc_call.wav for reading");
    }

    #[test]
    fn redact_leaves_unrelated_text_alone() {
        let msg = "exit status 1: model not found";
        assert_eq!(redact(msg, &[Path::new("/tmp/out.txt")]), msg);
    }
}
