//! Transcription endpoints – async task pattern.
//!
//! Uploads are streamed to disk and answered as soon as the task records are
//! persisted and admitted; transcription itself happens in the scheduler's
//! worker slots. Poll `GET /transcribe/{task_id}` for progress and fetch the
//! text via `GET /transcribe/{task_id}/download` once `completed`.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, info};
use utoipa::OpenApi;

use escriba_core::{TaskStatus, Variant};

use crate::error::ServerError;
use crate::ingest::{self, SavedAudio, VideoFanOut, MAX_BATCH_AUDIO_FILES, MAX_BATCH_VIDEO_FILES};
use crate::schemas::transcribe::{
    BatchAudioItem, BatchAudioResponse, BatchVideoItem, BatchVideoResponse, ExtractAudioResponse,
    FanOutSummary, TaskFileInfo, TaskFilesResponse, TaskListResponse, TaskResponse,
    TranscribeOptionsForm,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(
    transcribe_audio,
    batch_audio,
    extract_audio,
    batch_video,
    list_tasks,
    get_task,
    download_transcription,
    get_task_files,
    cancel_task,
    delete_task
))]
pub struct TranscribeApi;

/// Register transcription routes (nested under `/transcribe`).
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(transcribe_audio).get(list_tasks))
        .route("/batch-audio", post(batch_audio))
        .route("/extract-audio", post(extract_audio))
        .route("/batch-video", post(batch_video))
        .route("/{task_id}", get(get_task).delete(delete_task))
        .route("/{task_id}/download", get(download_transcription))
        .route("/{task_id}/files", get(get_task_files))
        .route("/{task_id}/cancel", post(cancel_task))
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> ServerError {
    ServerError::BadRequest(format!("failed to read multipart field: {e}"))
}

fn parse_options(text: &str) -> Result<TranscribeOptionsForm, ServerError> {
    serde_json::from_str(text).map_err(|e| ServerError::BadRequest(format!("invalid options: {e}")))
}

// ── Ingestion ─────────────────────────────────────────────────────────────────

/// Start one audio transcription (`POST /transcribe/`).
///
/// Multipart parts: `file` (required audio upload) and `options` (optional
/// JSON object; unknown keys are rejected). Returns the created task record;
/// transcription runs in the background.
#[utoipa::path(
    post,
    path = "/transcribe/",
    tag = "transcribe",
    responses(
        (status = 201, description = "Task created and admitted", body = TaskResponse),
        (status = 400, description = "Missing file or invalid options"),
        (status = 413, description = "Audio exceeds the size cap"),
        (status = 415, description = "Unsupported audio format"),
        (status = 503, description = "Admission queue full"),
    )
)]
pub async fn transcribe_audio(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, ServerError> {
    let mut saved: Option<SavedAudio> = None;
    let mut options_text: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name().unwrap_or("") {
            "file" => {
                if saved.is_some() {
                    if let Some(prev) = &saved {
                        let _ = tokio::fs::remove_file(&prev.path).await;
                    }
                    return Err(ServerError::BadRequest(
                        "multiple files; use /transcribe/batch-audio".to_owned(),
                    ));
                }
                saved = Some(ingest::save_audio_upload(&state, field).await?);
            }
            "options" => match field.text().await {
                Ok(text) => options_text = Some(text),
                Err(e) => {
                    if let Some(prev) = &saved {
                        let _ = tokio::fs::remove_file(&prev.path).await;
                    }
                    return Err(bad_multipart(e));
                }
            },
            other => debug!(field = other, "ignoring unknown multipart part"),
        }
    }

    let saved = saved.ok_or_else(|| ServerError::BadRequest("no file uploaded".to_owned()))?;
    let form = match options_text.as_deref().map(parse_options).transpose() {
        Ok(form) => form.unwrap_or_default(),
        Err(e) => {
            let _ = tokio::fs::remove_file(&saved.path).await;
            return Err(e);
        }
    };

    let options = form.into_options(&state.config.version_model);
    let record = ingest::create_audio_task(&state, saved, options, None).await?;
    Ok((StatusCode::CREATED, Json(TaskResponse::from(record))).into_response())
}

/// Batch audio upload (`POST /transcribe/batch-audio`).
///
/// All files share one `batch_id`; a file that fails validation is reported
/// in its item entry while the remaining files still proceed.
#[utoipa::path(
    post,
    path = "/transcribe/batch-audio",
    tag = "transcribe",
    responses(
        (status = 201, description = "Batch accepted", body = BatchAudioResponse),
        (status = 400, description = "No files or too many files"),
    )
)]
pub async fn batch_audio(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, ServerError> {
    let batch_id = escriba_core::new_task_id();
    let mut uploads: Vec<(String, Result<SavedAudio, String>)> = Vec::new();
    let mut options_text: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name().unwrap_or("") {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_owned();
                if uploads.len() >= MAX_BATCH_AUDIO_FILES {
                    uploads.push((
                        filename,
                        Err(format!("audio batch limit is {MAX_BATCH_AUDIO_FILES} files")),
                    ));
                    continue;
                }
                let outcome = match ingest::save_audio_upload(&state, field).await {
                    Ok(saved) => Ok(saved),
                    Err(e) => Err(e.client_parts().1),
                };
                uploads.push((filename, outcome));
            }
            "options" => options_text = Some(field.text().await.map_err(bad_multipart)?),
            other => debug!(field = other, "ignoring unknown multipart part"),
        }
    }

    if uploads.is_empty() {
        return Err(ServerError::BadRequest("no files uploaded".to_owned()));
    }
    let form = match options_text.as_deref().map(parse_options).transpose() {
        Ok(form) => form.unwrap_or_default(),
        Err(e) => {
            for (_, outcome) in &uploads {
                if let Ok(saved) = outcome {
                    let _ = tokio::fs::remove_file(&saved.path).await;
                }
            }
            return Err(e);
        }
    };
    let options = form.into_options(&state.config.version_model);

    let mut items = Vec::with_capacity(uploads.len());
    for (filename, outcome) in uploads {
        let item = match outcome {
            Ok(saved) => {
                match ingest::create_audio_task(&state, saved, options.clone(), Some(&batch_id))
                    .await
                {
                    Ok(record) => BatchAudioItem {
                        filename,
                        task_id: Some(record.task_id),
                        error: None,
                    },
                    Err(e) => BatchAudioItem {
                        filename,
                        task_id: None,
                        error: Some(e.client_parts().1),
                    },
                }
            }
            Err(message) => BatchAudioItem {
                filename,
                task_id: None,
                error: Some(message),
            },
        };
        items.push(item);
    }

    info!(%batch_id, total = items.len(), "audio batch processed");
    Ok((
        StatusCode::CREATED,
        Json(BatchAudioResponse { batch_id, items }),
    )
        .into_response())
}

/// Video ingest with fan-out (`POST /transcribe/extract-audio`).
///
/// Extracts a 16 kHz mono WAV from the uploaded video, then creates the four
/// sibling tasks atomically, all sharing the extracted artifact.
#[utoipa::path(
    post,
    path = "/transcribe/extract-audio",
    tag = "transcribe",
    responses(
        (status = 201, description = "Audio extracted, four variants admitted", body = ExtractAudioResponse),
        (status = 400, description = "No file uploaded"),
        (status = 413, description = "Video exceeds the size cap"),
        (status = 415, description = "Unsupported video format"),
        (status = 504, description = "Audio extraction timed out"),
    )
)]
pub async fn extract_audio(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, ServerError> {
    let mut fan_out: Option<VideoFanOut> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name().unwrap_or("") {
            "file" => {
                if fan_out.is_some() {
                    return Err(ServerError::BadRequest(
                        "multiple files; use /transcribe/batch-video".to_owned(),
                    ));
                }
                fan_out = Some(ingest::ingest_video(&state, field, None).await?);
            }
            other => debug!(field = other, "ignoring unknown multipart part"),
        }
    }

    let fan_out = fan_out.ok_or_else(|| ServerError::BadRequest("no file uploaded".to_owned()))?;
    Ok((
        StatusCode::CREATED,
        Json(ExtractAudioResponse {
            batch_id: fan_out.base_id,
            audio_path: fan_out.audio_path.display().to_string(),
            summary: FanOutSummary {
                total: fan_out.records.len(),
                types: Variant::ALL.iter().map(|v| v.suffix().to_owned()).collect(),
            },
            transcriptions: fan_out.records.into_iter().map(TaskResponse::from).collect(),
        }),
    )
        .into_response())
}

/// Batch video upload (`POST /transcribe/batch-video`).
///
/// Each video gets the full four-variant fan-out; all resulting tasks share
/// the batch's `batch_id`. Per-file failures do not abort the batch.
#[utoipa::path(
    post,
    path = "/transcribe/batch-video",
    tag = "transcribe",
    responses(
        (status = 201, description = "Batch accepted", body = BatchVideoResponse),
        (status = 400, description = "No files uploaded"),
    )
)]
pub async fn batch_video(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, ServerError> {
    let batch_id = escriba_core::new_task_id();
    let mut items: Vec<BatchVideoItem> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name().unwrap_or("") {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_owned();
                if items.len() >= MAX_BATCH_VIDEO_FILES {
                    items.push(BatchVideoItem {
                        filename,
                        transcriptions: None,
                        error: Some(format!("video batch limit is {MAX_BATCH_VIDEO_FILES} files")),
                    });
                    continue;
                }
                let item = match ingest::ingest_video(&state, field, Some(&batch_id)).await {
                    Ok(fan_out) => BatchVideoItem {
                        filename,
                        transcriptions: Some(
                            fan_out.records.into_iter().map(TaskResponse::from).collect(),
                        ),
                        error: None,
                    },
                    Err(e) => BatchVideoItem {
                        filename,
                        transcriptions: None,
                        error: Some(e.client_parts().1),
                    },
                };
                items.push(item);
            }
            other => debug!(field = other, "ignoring unknown multipart part"),
        }
    }

    if items.is_empty() {
        return Err(ServerError::BadRequest("no files uploaded".to_owned()));
    }
    info!(%batch_id, total = items.len(), "video batch processed");
    Ok((
        StatusCode::CREATED,
        Json(BatchVideoResponse { batch_id, items }),
    )
        .into_response())
}

// ── Task queries ──────────────────────────────────────────────────────────────

/// List all tasks (`GET /transcribe/`). Order is unspecified.
#[utoipa::path(
    get,
    path = "/transcribe/",
    tag = "transcribe",
    responses((status = 200, description = "All task records", body = TaskListResponse))
)]
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<TaskListResponse> {
    let tasks: Vec<TaskResponse> = state
        .store
        .list()
        .await
        .into_iter()
        .map(TaskResponse::from)
        .collect();
    let total = tasks.len();
    Json(TaskListResponse { tasks, total })
}

/// Fetch one task record (`GET /transcribe/{task_id}`).
#[utoipa::path(
    get,
    path = "/transcribe/{task_id}",
    tag = "transcribe",
    responses(
        (status = 200, description = "Task record", body = TaskResponse),
        (status = 404, description = "Unknown task id"),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResponse>, ServerError> {
    let record = state
        .store
        .get(&task_id)
        .await
        .ok_or_else(|| ServerError::NotFound(format!("task {task_id} not found")))?;
    Ok(Json(TaskResponse::from(record)))
}

/// Download the transcription text (`GET /transcribe/{task_id}/download`).
#[utoipa::path(
    get,
    path = "/transcribe/{task_id}/download",
    tag = "transcribe",
    responses(
        (status = 200, description = "Transcription text", body = String, content_type = "text/plain"),
        (status = 404, description = "Unknown task or missing output file"),
        (status = 409, description = "Task is not completed"),
    )
)]
pub async fn download_transcription(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Response, ServerError> {
    let record = state
        .store
        .get(&task_id)
        .await
        .ok_or_else(|| ServerError::NotFound(format!("task {task_id} not found")))?;

    if record.status != TaskStatus::Completed {
        return Err(ServerError::Conflict(format!(
            "transcription is not completed (status: {})",
            record.status.as_str()
        )));
    }
    let output_path = record
        .output_path
        .ok_or_else(|| ServerError::NotFound("transcription file not found".to_owned()))?;

    let body = tokio::fs::read(&output_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ServerError::NotFound("transcription file not found".to_owned())
        } else {
            ServerError::Internal(format!("failed to read transcription: {e}"))
        }
    })?;

    let download_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{task_id}.txt"));
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{download_name}\""),
            ),
        ],
        body,
    )
        .into_response())
}

/// Inspect the files associated with a task (`GET /transcribe/{task_id}/files`).
#[utoipa::path(
    get,
    path = "/transcribe/{task_id}/files",
    tag = "transcribe",
    responses(
        (status = 200, description = "File information", body = TaskFilesResponse),
        (status = 404, description = "Unknown task id"),
    )
)]
pub async fn get_task_files(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskFilesResponse>, ServerError> {
    let record = state
        .store
        .get(&task_id)
        .await
        .ok_or_else(|| ServerError::NotFound(format!("task {task_id} not found")))?;

    let mut files = vec![file_info("audio", &record.source_path).await];
    if let Some(output_path) = &record.output_path {
        files.push(file_info("transcription", output_path).await);
    }
    Ok(Json(TaskFilesResponse { task_id, files }))
}

async fn file_info(kind: &str, path: &std::path::Path) -> TaskFileInfo {
    let meta = tokio::fs::metadata(path).await.ok();
    TaskFileInfo {
        kind: kind.to_owned(),
        path: path.display().to_string(),
        exists: meta.is_some(),
        size_bytes: meta.map(|m| m.len()),
    }
}

// ── Cancellation & deletion ───────────────────────────────────────────────────

/// Cancel a task (`POST /transcribe/{task_id}/cancel`).
///
/// Returns `202` with the record as of the call; a `processing` task reaches
/// `failed` once its runner unwinds, observable via a subsequent `GET`.
/// Idempotent.
#[utoipa::path(
    post,
    path = "/transcribe/{task_id}/cancel",
    tag = "transcribe",
    responses(
        (status = 202, description = "Cancellation accepted", body = TaskResponse),
        (status = 404, description = "Unknown task id"),
    )
)]
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Response, ServerError> {
    let record = state.scheduler.cancel(&task_id).await?;
    Ok((StatusCode::ACCEPTED, Json(TaskResponse::from(record))).into_response())
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    /// Also remove the task's files (default: true).
    pub with_files: Option<bool>,
}

/// Delete a task (`DELETE /transcribe/{task_id}?with_files=bool`).
///
/// With `with_files`, the output file is removed and the audio artifact too
/// unless another task (a fan-out sibling) still references it.
#[utoipa::path(
    delete,
    path = "/transcribe/{task_id}",
    tag = "transcribe",
    params(("with_files" = Option<bool>, Query, description = "Also remove associated files (default true)")),
    responses(
        (status = 204, description = "Task deleted"),
        (status = 404, description = "Unknown task id"),
    )
)]
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ServerError> {
    let removed = state
        .store
        .delete(&task_id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("task {task_id} not found")))?;
    state.scheduler.forget(&task_id).await;

    if query.with_files.unwrap_or(true) {
        if let Some(output_path) = &removed.output_path {
            let _ = tokio::fs::remove_file(output_path).await;
        }
        // The audio artifact may be shared by fan-out siblings.
        let still_referenced = state
            .store
            .list()
            .await
            .iter()
            .any(|r| r.source_path == removed.source_path);
        if !still_referenced {
            let _ = tokio::fs::remove_file(&removed.source_path).await;
        }
    }

    info!(%task_id, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}
