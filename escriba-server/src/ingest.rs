//! The ingest path: streams uploads to disk under size caps, creates task
//! records, and drives the video → four-variant fan-out.

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::extract::multipart::Field;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use escriba_core::{new_task_id, MediaExtractor, TaskOptions, TaskRecord, Variant};

use crate::error::ServerError;
use crate::state::AppState;

/// Audio formats accepted for direct transcription.
pub const AUDIO_EXTENSIONS: [&str; 6] = ["wav", "mp3", "ogg", "m4a", "flac", "aac"];

/// Upper bound on files per batch-audio request.
pub const MAX_BATCH_AUDIO_FILES: usize = 10;

/// Upper bound on files per batch-video request (videos are heavy).
pub const MAX_BATCH_VIDEO_FILES: usize = 5;

/// Whether `filename` carries a supported audio extension.
pub fn is_audio_file(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            AUDIO_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Sanitize a client filename to prevent directory traversal.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn remove_quiet(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}

/// Stream a multipart field to `dest`, enforcing the byte cap and a per-chunk
/// idle timeout while the body arrives. The partial file is removed on any
/// failure. Returns the number of bytes written.
async fn save_field(
    mut field: Field<'_>,
    dest: &Path,
    cap: u64,
    idle: Duration,
) -> Result<u64, ServerError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ServerError::Internal(format!("failed to create upload dir: {e}")))?;
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| ServerError::Internal(format!("failed to create upload file: {e}")))?;
    let mut written: u64 = 0;

    loop {
        let chunk = match tokio::time::timeout(idle, field.chunk()).await {
            Ok(Ok(Some(chunk))) => chunk,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                remove_quiet(dest).await;
                return Err(ServerError::BadRequest(format!(
                    "failed to read upload: {e}"
                )));
            }
            Err(_) => {
                remove_quiet(dest).await;
                return Err(ServerError::BadRequest("upload timed out".to_owned()));
            }
        };

        written += chunk.len() as u64;
        if written > cap {
            remove_quiet(dest).await;
            return Err(ServerError::PayloadTooLarge(format!(
                "upload exceeds the limit of {cap} bytes"
            )));
        }
        if let Err(e) = file.write_all(&chunk).await {
            remove_quiet(dest).await;
            return Err(ServerError::Internal(format!(
                "failed to write upload: {e}"
            )));
        }
    }

    if let Err(e) = file.flush().await {
        remove_quiet(dest).await;
        return Err(ServerError::Internal(format!("failed to flush upload: {e}")));
    }
    if written == 0 {
        remove_quiet(dest).await;
        return Err(ServerError::BadRequest("empty upload".to_owned()));
    }
    Ok(written)
}

/// An audio upload already materialized on disk, not yet a task.
pub struct SavedAudio {
    pub task_id: String,
    pub original: String,
    pub path: PathBuf,
}

/// Validate and stream one audio part to the audios dir.
pub async fn save_audio_upload(
    state: &AppState,
    field: Field<'_>,
) -> Result<SavedAudio, ServerError> {
    let original = field.file_name().unwrap_or("upload").to_owned();
    if !is_audio_file(&original) {
        return Err(ServerError::UnsupportedMedia(format!(
            "unsupported audio format, allowed: {}",
            AUDIO_EXTENSIONS.join(", ")
        )));
    }

    let task_id = new_task_id();
    let dest = state
        .config
        .audios_dir
        .join(format!("{task_id}_{}", sanitize_filename(&original)));
    let size = save_field(
        field,
        &dest,
        state.config.max_audio_bytes,
        state.config.upload_idle_timeout(),
    )
    .await?;

    info!(%task_id, file = %original, size_bytes = size, "audio upload saved");
    Ok(SavedAudio {
        task_id,
        original,
        path: dest,
    })
}

/// Create and admit the task for a saved audio upload.
///
/// Both the record creation and the admission roll back on failure so that a
/// rejected request leaves nothing behind.
pub async fn create_audio_task(
    state: &AppState,
    saved: SavedAudio,
    options: TaskOptions,
    batch_id: Option<&str>,
) -> Result<TaskRecord, ServerError> {
    let mut record = TaskRecord::new(&saved.task_id, &saved.original, &saved.path, options);
    if let Some(batch_id) = batch_id {
        record = record.with_batch_id(batch_id);
    }

    if let Err(e) = state.store.create(record.clone()).await {
        remove_quiet(&saved.path).await;
        return Err(e.into());
    }
    if let Err(e) = state.scheduler.enqueue(&record.task_id).await {
        let _ = state.store.delete(&record.task_id).await;
        remove_quiet(&saved.path).await;
        return Err(e.into());
    }

    info!(task_id = %record.task_id, "transcription task admitted");
    Ok(record)
}

/// Result of a successful video ingest: one extracted artifact, four sibling
/// tasks.
pub struct VideoFanOut {
    pub base_id: String,
    pub audio_path: PathBuf,
    pub records: Vec<TaskRecord>,
}

/// Stream a video part to a temp path, extract its audio, and fan out into
/// the four canonical transcription variants.
///
/// The temp video is deleted once extraction succeeds; on any failure nothing
/// is left behind and no sibling exists (the fan-out is all-or-nothing).
pub async fn ingest_video(
    state: &AppState,
    field: Field<'_>,
    batch_id: Option<&str>,
) -> Result<VideoFanOut, ServerError> {
    let original = field.file_name().unwrap_or("upload").to_owned();
    if !MediaExtractor::is_video_file(&original) {
        return Err(ServerError::UnsupportedMedia(format!(
            "unsupported video format, allowed: {}",
            escriba_core::SUPPORTED_VIDEO_FORMATS.join(", ")
        )));
    }

    let base_id = new_task_id();
    let sanitized = sanitize_filename(&original);
    let stem = Path::new(&sanitized)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video")
        .to_owned();

    let video_tmp = std::env::temp_dir()
        .join("escriba_uploads")
        .join(format!("{base_id}_{sanitized}"));
    let size = save_field(
        field,
        &video_tmp,
        state.config.max_video_bytes,
        state.config.upload_idle_timeout(),
    )
    .await?;
    info!(%base_id, file = %original, size_bytes = size, "video upload saved");

    let audio_path = state
        .config
        .audios_dir
        .join(format!("{base_id}_{stem}.wav"));
    if let Err(e) = state.extractor.extract(&video_tmp, &audio_path).await {
        remove_quiet(&video_tmp).await;
        return Err(e.into());
    }
    remove_quiet(&video_tmp).await;

    let batch = batch_id.unwrap_or(&base_id).to_owned();
    let audio_filename = format!("{stem}.wav");
    let records: Vec<TaskRecord> = Variant::ALL
        .iter()
        .map(|variant| {
            TaskRecord::new(
                format!("{base_id}_{}", variant.suffix()),
                &audio_filename,
                &audio_path,
                TaskOptions::for_variant(*variant, &state.config.version_model),
            )
            .with_variant(*variant)
            .with_batch_id(&batch)
        })
        .collect();

    if let Err(e) = state.store.create_many(records.clone()).await {
        remove_quiet(&audio_path).await;
        return Err(e.into());
    }

    for record in &records {
        if let Err(e) = state.scheduler.enqueue(&record.task_id).await {
            // Admission failed mid-fan-out: withdraw the whole sibling set so
            // no observer sees a partial family.
            for r in &records {
                let _ = state.store.delete(&r.task_id).await;
                state.scheduler.forget(&r.task_id).await;
            }
            remove_quiet(&audio_path).await;
            return Err(e.into());
        }
    }

    info!(%base_id, audio = %audio_path.display(), "video fan-out admitted");
    Ok(VideoFanOut {
        base_id,
        audio_path,
        records,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recognizes_supported_audio_extensions() {
        assert!(is_audio_file("call.wav"));
        assert!(is_audio_file("CALL.MP3"));
        assert!(is_audio_file("nested.take2.flac"));
        assert!(!is_audio_file("clip.mp4"));
        assert!(!is_audio_file("notes.txt"));
        assert!(!is_audio_file("bare"));
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_filename("entrevista-01_final.wav"), "entrevista-01_final.wav");
    }

    #[test]
    fn sanitize_neutralizes_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("a b/c.wav"), "a_b_c.wav");
    }
}
