use crate::routes::{health, transcribe};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "escriba-server",
    description = "escriba transcription orchestrator API",
    version = "0.1.0",
    contact(name = "escriba-rs", url = "https://github.com/escriba-rs/escriba")
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(transcribe::TranscribeApi::openapi());
    root
}
