//! escriba-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON or pretty, stdout or LOG_FILE).
//! 3. Prepare the data directories and open the durable task store.
//! 4. Wire the transcriber capability (hot-model cache over the engine).
//! 5. Start the scheduler, which first recovers persisted state.
//! 6. Build the Axum router and start the HTTP server.

mod config;
mod error;
mod ingest;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use escriba_core::{
    CachedTranscriber, CommandTranscriber, MediaExtractor, Scheduler, SchedulerConfig, TaskStore,
    Transcriber,
};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    init_tracing(&cfg)?;
    info!(version = env!("CARGO_PKG_VERSION"), "escriba-server starting");

    // ── 3. Data directories and task store ─────────────────────────────────────
    tokio::fs::create_dir_all(&cfg.audios_dir).await?;
    tokio::fs::create_dir_all(&cfg.transcriptions_dir).await?;
    let store = TaskStore::open(&cfg.transcriptions_dir).await;
    info!(path = %store.path().display(), "task store ready");

    // ── 4. Transcriber capability ──────────────────────────────────────────────
    let transcriber_bin = cfg.transcriber_bin.clone();
    let transcriber: Arc<dyn Transcriber> = Arc::new(CachedTranscriber::new(move |_options| {
        Arc::new(CommandTranscriber::new(transcriber_bin.clone())) as Arc<dyn Transcriber>
    }));

    // ── 5. Scheduler (recovery happens before new admissions) ──────────────────
    let scheduler = Scheduler::start(
        store.clone(),
        transcriber,
        SchedulerConfig {
            max_concurrent_tasks: cfg.max_concurrent_tasks,
            task_timeout: cfg.task_timeout(),
            transcriptions_dir: cfg.transcriptions_dir.clone(),
            force_cpu: cfg.force_cpu,
        },
    )
    .await;
    info!(slots = cfg.max_concurrent_tasks, "scheduler started");

    // ── 6. HTTP server ─────────────────────────────────────────────────────────
    let extractor = MediaExtractor::new(cfg.extractor_timeout());
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let state = Arc::new(AppState {
        config: Arc::new(cfg),
        store,
        scheduler,
        extractor,
    });
    let app = routes::build(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(cfg: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cfg.log_level.parse().unwrap_or_default());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match (&cfg.log_file, cfg.log_json) {
        (Some(path), true) => {
            let file = open_log_file(path)?;
            builder
                .json()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        (Some(path), false) => {
            let file = open_log_file(path)?;
            builder.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        (None, true) => builder.json().init(),
        (None, false) => builder.init(),
    }
    Ok(())
}

fn open_log_file(path: &str) -> anyhow::Result<std::fs::File> {
    Ok(std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?)
}
