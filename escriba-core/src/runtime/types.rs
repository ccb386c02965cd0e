use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// High-level lifecycle state of a task managed by the [`Scheduler`].
///
/// Transitions form a monotonic DAG: `Pending → Processing → {Completed, Failed}`.
/// `Completed` and `Failed` are terminal.
///
/// [`Scheduler`]: crate::runtime::scheduler::Scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task has been accepted but not yet started.
    Pending,
    /// A job runner is actively transcribing the task.
    Processing,
    /// Transcription finished; `output_path` is available.
    Completed,
    /// Transcription failed, was canceled, or was interrupted; `error` is set.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Output container for a finished transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Txt,
    Json,
    Srt,
}

impl OutputFormat {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Txt => "txt",
            OutputFormat::Json => "json",
            OutputFormat::Srt => "srt",
        }
    }
}

/// The four canonical option sets produced by a video fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Plain text, no annotations.
    Limpa,
    /// Timestamped text.
    Timestamps,
    /// Speaker-attributed text.
    Diarization,
    /// Timestamps and speakers.
    Completa,
}

impl Variant {
    pub const ALL: [Variant; 4] = [
        Variant::Limpa,
        Variant::Timestamps,
        Variant::Diarization,
        Variant::Completa,
    ];

    /// Suffix appended to the base task id for this sibling.
    pub fn suffix(&self) -> &'static str {
        match self {
            Variant::Limpa => "limpa",
            Variant::Timestamps => "timestamps",
            Variant::Diarization => "diarization",
            Variant::Completa => "completa",
        }
    }

    pub fn timestamps(&self) -> bool {
        matches!(self, Variant::Timestamps | Variant::Completa)
    }

    pub fn diarization(&self) -> bool {
        matches!(self, Variant::Diarization | Variant::Completa)
    }
}

/// Immutable per-task transcription options, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub timestamps: bool,
    pub diarization: bool,
    pub output_format: OutputFormat,
    pub model: String,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            timestamps: true,
            diarization: true,
            output_format: OutputFormat::Txt,
            model: "turbo".to_owned(),
        }
    }
}

impl TaskOptions {
    /// The option set for a video fan-out sibling.
    pub fn for_variant(variant: Variant, model: impl Into<String>) -> Self {
        Self {
            timestamps: variant.timestamps(),
            diarization: variant.diarization(),
            output_format: OutputFormat::Txt,
            model: model.into(),
        }
    }
}

/// The central entity: one transcription unit against one audio artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    /// Display name derived from the client upload.
    pub filename: String,
    /// Audio artifact consumed by the transcriber.
    pub source_path: PathBuf,
    pub status: TaskStatus,
    pub options: TaskOptions,
    pub created_at: DateTime<Utc>,
    /// Set iff the task has ever been `processing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff the task is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Which of the four fan-out option sets this sibling carries, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
    /// Shared across tasks created by the same video ingest or batch upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

impl TaskRecord {
    pub fn new(
        task_id: impl Into<String>,
        filename: impl Into<String>,
        source_path: impl Into<PathBuf>,
        options: TaskOptions,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            filename: filename.into(),
            source_path: source_path.into(),
            status: TaskStatus::Pending,
            options,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output_path: None,
            error: None,
            variant: None,
            batch_id: None,
        }
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = Some(variant);
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }
}

/// Allocate a fresh task id: `{YYYYMMDD}_{HHMMSS}_{8 hex chars}`.
///
/// The id shape is observable by clients; video fan-out siblings append a
/// variant suffix to a shared base id.
pub fn new_task_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &uuid[..8])
}

/// Errors produced by the runtime layer.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// `create` refuses to silently overwrite an existing record.
    #[error("task already exists: {task_id}")]
    DuplicateTask { task_id: String },

    /// The referenced task does not exist.
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// A mutation attempted to leave the `pending → processing → terminal` DAG.
    #[error("invalid status transition for {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The scheduler admission queue is at capacity.
    #[error("scheduler queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The scheduler dispatch loop has exited.
    #[error("scheduler shut down")]
    SchedulerShutdown,

    /// Writing the task store document failed; in-memory state was rolled back.
    #[error("task store persistence failed: {0}")]
    Persist(#[source] std::io::Error),

    /// Encoding the task store document failed.
    #[error("task store serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
