use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// Options for one transcriber invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscribeOptions {
    pub timestamps: bool,
    pub diarization: bool,
    pub model: String,
    pub force_cpu: bool,
}

/// Errors surfaced by a [`Transcriber`] implementation.
#[derive(Debug, Error)]
pub enum TranscribeError {
    /// The cancellation signal fired before or during the run.
    #[error("transcription canceled")]
    Canceled,

    /// The speech engine reported a failure.
    #[error("transcriber failed: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The speech-to-text capability consumed by the job runner.
///
/// Implementations write a text file at `output_path` and return. They must
/// observe `cancel` promptly: when the watched value flips to `true` the run
/// aborts with [`TranscribeError::Canceled`]. The scheduler serializes calls
/// through its worker slots, so implementations need `Send + Sync` but not
/// re-entrancy.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
        output_path: &Path,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), TranscribeError>;
}

/// Resolves once the watched cancellation flag is `true`.
///
/// A dropped sender means the task can no longer be canceled; the future
/// then never resolves.
pub(crate) async fn cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ─── Model cache ──────────────────────────────────────────────────────────────

type CacheKey = (String, bool);

/// Builds a concrete engine for a `(model, force_cpu)` pair.
pub type EngineFactory = dyn Fn(&TranscribeOptions) -> Arc<dyn Transcriber> + Send + Sync;

/// At-most-one-instance engine cache.
///
/// Holds a single engine keyed by `(model, force_cpu)`. A request with a
/// different key drops the cached engine before the factory builds its
/// replacement, so two hot-loaded models never coexist.
pub struct CachedTranscriber {
    factory: Box<EngineFactory>,
    slot: Mutex<Option<(CacheKey, Arc<dyn Transcriber>)>>,
}

impl CachedTranscriber {
    pub fn new(
        factory: impl Fn(&TranscribeOptions) -> Arc<dyn Transcriber> + Send + Sync + 'static,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            slot: Mutex::new(None),
        }
    }

    async fn engine_for(&self, options: &TranscribeOptions) -> Arc<dyn Transcriber> {
        let key: CacheKey = (options.model.clone(), options.force_cpu);
        let mut slot = self.slot.lock().await;
        if let Some((cached_key, engine)) = slot.as_ref() {
            if *cached_key == key {
                return Arc::clone(engine);
            }
            info!(model = %key.0, force_cpu = key.1, "model changed, replacing cached engine");
        }
        // Release the old engine before constructing the new one.
        *slot = None;
        let engine = (self.factory)(options);
        *slot = Some((key, Arc::clone(&engine)));
        engine
    }
}

#[async_trait]
impl Transcriber for CachedTranscriber {
    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
        output_path: &Path,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), TranscribeError> {
        let engine = self.engine_for(options).await;
        engine
            .transcribe(audio_path, options, output_path, cancel)
            .await
    }
}

// ─── External command engine ──────────────────────────────────────────────────

/// Speech engine backed by an external command.
///
/// The command receives explicit flags for every option and is expected to
/// write the transcription to `--output`. Cancellation kills the child.
pub struct CommandTranscriber {
    program: PathBuf,
}

impl CommandTranscriber {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
        output_path: &Path,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), TranscribeError> {
        if *cancel.borrow() {
            return Err(TranscribeError::Canceled);
        }

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("--input")
            .arg(audio_path)
            .arg("--output")
            .arg(output_path)
            .arg("--model")
            .arg(&options.model)
            .arg("--device")
            .arg(if options.force_cpu { "cpu" } else { "auto" });
        if options.timestamps {
            cmd.arg("--timestamps");
        }
        if options.diarization {
            cmd.arg("--diarization");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!(
            program = %self.program.display(),
            audio = %audio_path.display(),
            model = %options.model,
            "spawning transcriber"
        );

        let mut child = cmd.spawn()?;
        let mut stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancelled(cancel) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(TranscribeError::Canceled);
            }
        };

        let stderr_tail = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(TranscribeError::Engine(format!(
                "exit status {}: {}",
                status.code().unwrap_or(-1),
                stderr_tail.trim()
            )));
        }

        // A zero exit with no transcription written is still a failure.
        match tokio::fs::metadata(output_path).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(TranscribeError::Engine(
                "transcriber produced no output".to_owned(),
            )),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopEngine;

    #[async_trait]
    impl Transcriber for NoopEngine {
        async fn transcribe(
            &self,
            _audio_path: &Path,
            _options: &TranscribeOptions,
            _output_path: &Path,
            _cancel: watch::Receiver<bool>,
        ) -> Result<(), TranscribeError> {
            Ok(())
        }
    }

    fn options(model: &str, force_cpu: bool) -> TranscribeOptions {
        TranscribeOptions {
            timestamps: false,
            diarization: false,
            model: model.to_owned(),
            force_cpu,
        }
    }

    #[tokio::test]
    async fn cache_builds_engine_once_per_key() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let cache = CachedTranscriber::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(NoopEngine)
        });

        let opts = options("turbo", true);
        cache.engine_for(&opts).await;
        cache.engine_for(&opts).await;
        assert_eq!(built.load(Ordering::SeqCst), 1, "same key should reuse engine");
    }

    #[tokio::test]
    async fn cache_rebuilds_on_model_change() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let cache = CachedTranscriber::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(NoopEngine)
        });

        cache.engine_for(&options("small", false)).await;
        cache.engine_for(&options("large", false)).await;
        cache.engine_for(&options("large", false)).await;
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_rebuilds_on_device_change() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let cache = CachedTranscriber::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(NoopEngine)
        });

        cache.engine_for(&options("turbo", false)).await;
        cache.engine_for(&options("turbo", true)).await;
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn command_engine_missing_binary_is_io_error() {
        let engine = CommandTranscriber::new("/nonexistent/escriba-transcribe");
        let (_tx, rx) = watch::channel(false);
        let err = engine
            .transcribe(
                Path::new("in.wav"),
                &options("turbo", true),
                Path::new("out.txt"),
                rx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::Io(_)));
    }

    #[tokio::test]
    async fn command_engine_honors_prefired_cancel() {
        let engine = CommandTranscriber::new("/nonexistent/escriba-transcribe");
        let (tx, rx) = watch::channel(false);
        tx.send(true).expect("receiver alive");
        let err = engine
            .transcribe(
                Path::new("in.wav"),
                &options("turbo", true),
                Path::new("out.txt"),
                rx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::Canceled));
    }
}
