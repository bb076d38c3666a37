pub mod api;
pub mod models;
pub mod orchestrator;
pub mod registry;

pub use api::{
    list_voices as jobs_list_voices, submit_download as jobs_submit_download,
    submit_synthesis as jobs_submit_synthesis, submit_transcription as jobs_submit_transcription,
    BALANCE_REMAINING_HEADER, DEFAULT_VOICE, TOKENS_CHARGED_HEADER,
};
pub use models::{JobError, JobKind, JobPayload, JobReceipt, JobState};
pub use orchestrator::JobOrchestrator;
pub use registry::{CapabilityRegistry, EngineSet};
