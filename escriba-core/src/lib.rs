mod runtime;
mod services;

pub use runtime::scheduler::{Scheduler, SchedulerConfig};
pub use runtime::store::TaskStore;
pub use runtime::types::{
    new_task_id, OutputFormat, RuntimeError, TaskOptions, TaskRecord, TaskStatus, Variant,
};
pub use services::extractor::{ExtractError, MediaExtractor, SUPPORTED_VIDEO_FORMATS};
pub use services::transcriber::{
    CachedTranscriber, CommandTranscriber, TranscribeError, TranscribeOptions, Transcriber,
};
