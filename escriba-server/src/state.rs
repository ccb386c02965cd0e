//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use escriba_core::{MediaExtractor, Scheduler, TaskStore};

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Durable task records.
    pub store: TaskStore,
    /// Admission, slots and cancellation.
    pub scheduler: Scheduler,
    /// FFmpeg-backed audio extraction.
    pub extractor: MediaExtractor,
}
