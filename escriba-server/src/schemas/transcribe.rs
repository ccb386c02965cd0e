use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use escriba_core::{OutputFormat, TaskOptions, TaskRecord};

/// Client-supplied transcription options, sent as a JSON object in the
/// multipart `options` part. Unknown keys are a validation error.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct TranscribeOptionsForm {
    pub timestamps: Option<bool>,
    pub diarization: Option<bool>,
    #[schema(value_type = Option<String>, example = "txt")]
    pub output_format: Option<OutputFormat>,
    pub model: Option<String>,
}

impl TranscribeOptionsForm {
    /// Fill the gaps with server defaults.
    pub fn into_options(self, default_model: &str) -> TaskOptions {
        let defaults = TaskOptions::default();
        TaskOptions {
            timestamps: self.timestamps.unwrap_or(defaults.timestamps),
            diarization: self.diarization.unwrap_or(defaults.diarization),
            output_format: self.output_format.unwrap_or(defaults.output_format),
            model: self.model.unwrap_or_else(|| default_model.to_owned()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskOptionsResponse {
    pub timestamps: bool,
    pub diarization: bool,
    pub output_format: String,
    pub model: String,
}

/// Wire representation of a task record. Timestamps are RFC 3339 with
/// timezone; absent optionals are omitted.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskResponse {
    pub task_id: String,
    pub filename: String,
    pub status: String,
    pub options: TaskOptionsResponse,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

impl From<TaskRecord> for TaskResponse {
    fn from(record: TaskRecord) -> Self {
        Self {
            task_id: record.task_id,
            filename: record.filename,
            status: record.status.as_str().to_owned(),
            options: TaskOptionsResponse {
                timestamps: record.options.timestamps,
                diarization: record.options.diarization,
                output_format: record.options.output_format.extension().to_owned(),
                model: record.options.model,
            },
            created_at: record.created_at.to_rfc3339(),
            started_at: record.started_at.map(|t| t.to_rfc3339()),
            completed_at: record.completed_at.map(|t| t.to_rfc3339()),
            output_path: record.output_path.map(|p| p.display().to_string()),
            error: record.error,
            variant: record.variant.map(|v| v.suffix().to_owned()),
            batch_id: record.batch_id,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FanOutSummary {
    pub total: usize,
    pub types: Vec<String>,
}

/// Response of a successful video ingest: the shared artifact plus the four
/// sibling tasks.
#[derive(Debug, Serialize, ToSchema)]
pub struct ExtractAudioResponse {
    pub batch_id: String,
    pub audio_path: String,
    pub transcriptions: Vec<TaskResponse>,
    pub summary: FanOutSummary,
}

/// One entry per uploaded file in a batch-audio response.
#[derive(Debug, Serialize, ToSchema)]
pub struct BatchAudioItem {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchAudioResponse {
    pub batch_id: String,
    pub items: Vec<BatchAudioItem>,
}

/// One entry per uploaded file in a batch-video response.
#[derive(Debug, Serialize, ToSchema)]
pub struct BatchVideoItem {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcriptions: Option<Vec<TaskResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchVideoResponse {
    pub batch_id: String,
    pub items: Vec<BatchVideoItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskFileInfo {
    pub kind: String,
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Files associated with a task: its audio artifact and, when present, the
/// transcription output.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskFilesResponse {
    pub task_id: String,
    pub files: Vec<TaskFileInfo>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_option_keys_are_rejected() {
        let err = serde_json::from_str::<TranscribeOptionsForm>(r#"{"speed": 2}"#).unwrap_err();
        assert!(err.to_string().contains("speed"));
    }

    #[test]
    fn options_default_to_full_annotation() {
        let form: TranscribeOptionsForm = serde_json::from_str("{}").unwrap();
        let options = form.into_options("turbo");
        assert!(options.timestamps);
        assert!(options.diarization);
        assert_eq!(options.output_format, OutputFormat::Txt);
        assert_eq!(options.model, "turbo");
    }

    #[test]
    fn explicit_options_override_defaults() {
        let form: TranscribeOptionsForm = serde_json::from_str(
            r#"{"timestamps": false, "output_format": "srt", "model": "small"}"#,
        )
        .unwrap();
        let options = form.into_options("turbo");
        assert!(!options.timestamps);
        assert!(options.diarization);
        assert_eq!(options.output_format, OutputFormat::Srt);
        assert_eq!(options.model, "small");
    }

    #[test]
    fn task_response_omits_absent_optionals() {
        let record = TaskRecord::new("t1", "a.wav", "/tmp/a.wav", TaskOptions::default());
        let body = serde_json::to_value(TaskResponse::from(record)).unwrap();
        assert_eq!(body["status"], "pending");
        assert!(body.get("started_at").is_none());
        assert!(body.get("error").is_none());
    }
}
