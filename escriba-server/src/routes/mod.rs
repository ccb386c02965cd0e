//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI spec endpoint (disable with `ESCRIBA_ENABLE_SWAGGER=false`)
//! - Health / heartbeat route
//! - The `/transcribe` task surface
//!
//! The default Axum body limit would cap uploads at 2 MiB, so the API router
//! raises it to the video cap plus multipart overhead.

pub mod doc;
mod health;
mod transcribe;

use crate::middleware::{cors, trace};
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_video_bytes as usize + 1024 * 1024;
    let api_router = Router::new()
        .merge(health::router())
        .nest("/transcribe", transcribe::router())
        .layer(DefaultBodyLimit::max(body_limit));

    let mut app = Router::new().merge(api_router);

    // ── Swagger UI ────────────────────────────────────────────────────────────
    // Enabled by default; disable with ESCRIBA_ENABLE_SWAGGER=false in
    // production to avoid exposing the API structure.
    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(axum::middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}
