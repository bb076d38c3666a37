//! Capability adapters wrap the external media engines behind one contract:
//! a cheap `prepare` that classifies the request and yields the cost basis,
//! and an expensive `execute` that writes the artifact to a staged path.

pub mod download;
pub mod process;
pub mod synthesis;
pub mod transcription;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::jobs::{JobKind, JobPayload};
use crate::metering::CostBasis;
use crate::storage::StorageError;

pub use download::{DownloadAdapter, Platform};
pub use process::{EdgeTtsCli, FfprobeCli, WhisperCli, YtDlpCli};
pub use synthesis::{is_known_voice, SynthesisAdapter, Voice, VOICES};
pub use transcription::{
    is_allowed_upload, language_name, TranscriptionAdapter, ALLOWED_UPLOAD_EXTENSIONS,
};

/// Closed set of adapter failures. The first three are raised by `prepare`
/// and carry no side effects; the rest come out of `execute`.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("speech synthesis is unavailable")]
    SynthesisUnavailable,
    #[error("unsupported platform for url {0}")]
    UnsupportedPlatform(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("no speech detected")]
    NoSpeechDetected,
    #[error("engine failed: {0}")]
    Engine(String),
    #[error("engine timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Output of `prepare`: what the job will be charged for.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub basis: CostBasis,
    /// Human label carried into the ledger note (platform name, voice).
    pub label: Option<String>,
}

impl Estimate {
    pub fn new(basis: CostBasis) -> Self {
        Self { basis, label: None }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A produced file plus whatever the engine reported about it.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    /// Suggested file name when handing the artifact to a user.
    pub download_name: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Artifact {
    pub fn new(path: &Path, size_bytes: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            download_name: file_name_of(path),
            size_bytes,
            duration_seconds: None,
            title: None,
            language: None,
        }
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
pub trait CapabilityAdapter: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Extension of the file `execute` writes.
    fn output_extension(&self) -> &'static str;

    /// Cheap pre-flight check. Must not touch the network or decode media.
    async fn prepare(&self, payload: &JobPayload) -> Result<Estimate, AdapterError>;

    /// Runs the engine and writes the artifact to `output`. On failure the
    /// adapter removes any temporary files of its own; `output` itself is
    /// owned and discarded by the caller.
    async fn execute(
        &self,
        payload: &JobPayload,
        estimate: &Estimate,
        output: &Path,
    ) -> Result<Artifact, AdapterError>;
}

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedVideo {
    pub path: PathBuf,
    pub title: String,
}

#[async_trait]
pub trait VideoFetcher: Send + Sync {
    /// Downloads and remuxes `url` to mp4 at (or next to) `output`.
    async fn fetch(&self, url: &str, output: &Path) -> anyhow::Result<FetchedVideo>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    /// Language code the engine used or detected.
    pub language: Option<String>,
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(&self, input: &Path, language: Option<&str>)
        -> anyhow::Result<Transcript>;
}

#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Reads the container metadata only.
    async fn duration_seconds(&self, input: &Path) -> anyhow::Result<f64>;
}

/// True when the error chain bottoms out in a missing executable.
pub(crate) fn is_missing_binary(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .map(|io| io.kind() == std::io::ErrorKind::NotFound)
            .unwrap_or(false)
    })
}
