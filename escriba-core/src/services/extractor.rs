use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Video container formats accepted for audio extraction.
pub const SUPPORTED_VIDEO_FORMATS: [&str; 11] = [
    "mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v", "3gp", "mpg", "mpeg",
];

/// Grace period between signaling a timed-out decoder and force-killing it.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// How many trailing stderr lines to keep for error reporting.
const STDERR_TAIL_LINES: usize = 20;

/// Errors surfaced by [`MediaExtractor::extract`].
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported video format: .{extension}")]
    UnsupportedFormat { extension: String },

    /// The decoder exited nonzero or produced no usable output.
    #[error("audio decoder failed: {detail}")]
    DecoderError { detail: String },

    #[error("audio decoder timed out after {timeout:?}")]
    DecoderTimeout { timeout: Duration },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Extracts a canonical 16 kHz mono PCM WAV from a source video by driving
/// an FFmpeg subprocess.
///
/// The extractor never deletes the source video; cleanup after a successful
/// extraction belongs to the caller.
#[derive(Debug, Clone)]
pub struct MediaExtractor {
    program: PathBuf,
    timeout: Duration,
}

impl MediaExtractor {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("ffmpeg", timeout)
    }

    /// Use a decoder binary other than `ffmpeg` on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Whether `filename` carries a supported video extension.
    pub fn is_video_file(filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                SUPPORTED_VIDEO_FORMATS.contains(&e.as_str())
            })
            .unwrap_or(false)
    }

    /// Decode `video_path` into a 16 kHz mono signed-16 WAV at `output_path`.
    pub async fn extract(&self, video_path: &Path, output_path: &Path) -> Result<(), ExtractError> {
        let extension = video_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !SUPPORTED_VIDEO_FORMATS.contains(&extension.as_str()) {
            return Err(ExtractError::UnsupportedFormat { extension });
        }

        // Surface a missing input as an I/O error up front instead of a
        // cryptic decoder exit.
        tokio::fs::metadata(video_path).await?;

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // -vn: drop the video stream; pcm_s16le @ 16 kHz mono is what the
        // speech engines expect; -y: overwrite a stale artifact.
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("-i")
            .arg(video_path)
            .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1", "-y"])
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!(
            input = %video_path.display(),
            output = %output_path.display(),
            "starting audio extraction"
        );

        let mut child = cmd.spawn()?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!(decoder_stderr = %line, "decoder log");
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                // Signal the decoder, then force-kill once the grace expires.
                warn!(input = %video_path.display(), "decoder timed out, terminating");
                let _ = child.start_kill();
                if timeout(KILL_GRACE, child.wait()).await.is_err() {
                    let _ = child.kill().await;
                }
                let _ = stderr_task.await;
                return Err(ExtractError::DecoderTimeout {
                    timeout: self.timeout,
                });
            }
        };

        let stderr_tail = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(ExtractError::DecoderError {
                detail: format!(
                    "exit status {}: {}",
                    status.code().unwrap_or(-1),
                    stderr_tail.trim()
                ),
            });
        }

        // A clean exit with a missing or empty WAV is still a decoder failure.
        match tokio::fs::metadata(output_path).await {
            Ok(meta) if meta.len() > 0 => {
                info!(
                    output = %output_path.display(),
                    size_bytes = meta.len(),
                    "audio extracted"
                );
                Ok(())
            }
            _ => Err(ExtractError::DecoderError {
                detail: "decoder produced no output".to_owned(),
            }),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recognizes_supported_video_extensions() {
        assert!(MediaExtractor::is_video_file("talk.mp4"));
        assert!(MediaExtractor::is_video_file("TALK.MKV"));
        assert!(MediaExtractor::is_video_file("a.b.webm"));
        assert!(!MediaExtractor::is_video_file("talk.wav"));
        assert!(!MediaExtractor::is_video_file("notes.txt"));
        assert!(!MediaExtractor::is_video_file("no_extension"));
    }

    #[tokio::test]
    async fn rejects_unsupported_extension_before_spawning() {
        let extractor = MediaExtractor::new(Duration::from_secs(1));
        let err = extractor
            .extract(Path::new("upload.txt"), Path::new("out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractError::UnsupportedFormat { ref extension } if extension == "txt"
        ));
    }

    #[tokio::test]
    async fn missing_input_is_io_error() {
        let extractor = MediaExtractor::new(Duration::from_secs(1));
        let err = extractor
            .extract(Path::new("/nonexistent/clip.mp4"), Path::new("out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
    }

    #[tokio::test]
    async fn clean_exit_without_output_is_decoder_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("clip.mp4");
        tokio::fs::write(&input, b"not really a video").await.unwrap();

        // `true` exits 0 while ignoring its arguments, so no WAV appears.
        let extractor = MediaExtractor::with_program("true", Duration::from_secs(5));
        let err = extractor
            .extract(&input, &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractError::DecoderError { ref detail } if detail.contains("no output")
        ));
    }

    #[tokio::test]
    async fn nonzero_exit_is_decoder_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("clip.mp4");
        tokio::fs::write(&input, b"not really a video").await.unwrap();

        let extractor = MediaExtractor::with_program("false", Duration::from_secs(5));
        let err = extractor
            .extract(&input, &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::DecoderError { .. }));
    }
}
