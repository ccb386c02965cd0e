//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for escriba-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Optional log file; stdout when unset.
    pub log_file: Option<String>,

    /// Comma-separated CORS origin allow-list; wildcard when unset.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI at `/swagger-ui` (default: true).
    pub enable_swagger: bool,

    /// Where uploaded and extracted audio artifacts live.
    pub audios_dir: PathBuf,

    /// Where transcription outputs and the task document live.
    pub transcriptions_dir: PathBuf,

    /// Worker slots for concurrent transcriptions.
    pub max_concurrent_tasks: usize,

    /// Per-task wall-clock ceiling in seconds; 0 disables the timer.
    pub task_timeout_seconds: u64,

    /// Upload cap for audio files, in bytes.
    pub max_audio_bytes: u64,

    /// Upload cap for video files, in bytes.
    pub max_video_bytes: u64,

    /// Wall-clock ceiling per audio extraction, in seconds.
    pub extractor_timeout_seconds: u64,

    /// Per-chunk read timeout for uploads, guarding against slow-loris abuse.
    pub upload_idle_timeout_seconds: u64,

    /// Default speech model when the client does not pick one.
    pub version_model: String,

    /// Pin the transcriber to the CPU.
    pub force_cpu: bool,

    /// External speech-to-text command invoked per task.
    pub transcriber_bin: String,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("ESCRIBA_BIND", "0.0.0.0:3000"),
            log_level: env_or("ESCRIBA_LOG", "info"),
            log_json: bool_env("ESCRIBA_LOG_JSON"),
            log_file: std::env::var("LOG_FILE").ok().filter(|v| !v.is_empty()),
            cors_allowed_origins: std::env::var("ESCRIBA_CORS_ORIGINS").ok(),
            enable_swagger: std::env::var("ESCRIBA_ENABLE_SWAGGER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            audios_dir: PathBuf::from(env_or("AUDIOS_DIR", "./public/audios")),
            transcriptions_dir: PathBuf::from(env_or(
                "TRANSCRIPTIONS_DIR",
                "./public/transcriptions",
            )),
            max_concurrent_tasks: parse_env("MAX_CONCURRENT_TASKS", 3),
            task_timeout_seconds: parse_env("TASK_TIMEOUT_SECONDS", 600),
            max_audio_bytes: parse_env("MAX_AUDIO_BYTES", 100 * 1024 * 1024),
            max_video_bytes: parse_env("MAX_VIDEO_BYTES", 500 * 1024 * 1024),
            extractor_timeout_seconds: parse_env("EXTRACTOR_TIMEOUT_SECONDS", 600),
            upload_idle_timeout_seconds: parse_env("UPLOAD_IDLE_TIMEOUT_SECONDS", 30),
            version_model: env_or("VERSION_MODEL", "turbo"),
            force_cpu: bool_env("FORCE_CPU"),
            transcriber_bin: env_or("TRANSCRIBER_BIN", "escriba-transcribe"),
        }
    }

    /// Per-task timeout; `None` when disabled.
    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_seconds > 0).then(|| Duration::from_secs(self.task_timeout_seconds))
    }

    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor_timeout_seconds)
    }

    pub fn upload_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_idle_timeout_seconds)
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn bool_env(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
