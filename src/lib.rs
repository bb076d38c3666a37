pub mod accounts;
pub mod adapters;
pub mod admin;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod jobs;
pub mod metering;
pub mod routes;
pub mod state;
pub mod storage;

pub use config::MeterConfig;
pub use jobs::{CapabilityRegistry, EngineSet, JobOrchestrator};
pub use state::AppState;
pub use storage::ArtifactStore;
