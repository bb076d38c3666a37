use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::adapters::{AdapterError, Artifact};
use crate::metering::LedgerError;

/// key: job-kinds -> synthesis,download,transcription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Synthesis,
    Download,
    Transcription,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Synthesis, JobKind::Download, JobKind::Transcription];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Synthesis => "synthesis",
            JobKind::Download => "download",
            JobKind::Transcription => "transcription",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific input of a job. Transient: consumed by one submission.
#[derive(Debug, Clone)]
pub enum JobPayload {
    Synthesis {
        text: String,
        voice: String,
    },
    Download {
        url: String,
    },
    /// `upload` is a staged file the orchestrator deletes once the job
    /// resolves, whatever the outcome.
    Transcription {
        upload: PathBuf,
        language: Option<String>,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Synthesis { .. } => JobKind::Synthesis,
            JobPayload::Download { .. } => JobKind::Download,
            JobPayload::Transcription { .. } => JobKind::Transcription,
        }
    }

    pub fn staged_input(&self) -> Option<&Path> {
        match self {
            JobPayload::Transcription { upload, .. } => Some(upload.as_path()),
            _ => None,
        }
    }
}

/// Lifecycle of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Received,
    CostChecked,
    Executing,
    Committed,
    Rejected,
    FailedCleaned,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Received => "received",
            JobState::CostChecked => "cost_checked",
            JobState::Executing => "executing",
            JobState::Committed => "committed",
            JobState::Rejected => "rejected",
            JobState::FailedCleaned => "failed_cleaned",
        }
    }
}

/// What the caller receives for a committed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReceipt {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub artifact: Artifact,
    pub tokens_charged: i64,
    pub balance_after: i64,
    pub transaction_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_id: Option<i64>,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0} is disabled")]
    FeatureDisabled(JobKind),
    #[error("account {0} not found")]
    AccountNotFound(i64),
    #[error("insufficient tokens: needed {needed}, available {available}")]
    InsufficientBalance { needed: i64, available: i64 },
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("no speech detected in the uploaded file")]
    NoSpeechDetected,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl JobError {
    /// Stable machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::FeatureDisabled(_) => "feature_disabled",
            JobError::AccountNotFound(_) => "account_not_found",
            JobError::InsufficientBalance { .. } => "insufficient_balance",
            JobError::UnsupportedPlatform(_) => "unsupported_platform",
            JobError::InvalidRequest(_) => "invalid_request",
            JobError::Engine(_) => "engine_error",
            JobError::NoSpeechDetected => "no_speech_detected",
            JobError::Storage(_) | JobError::Db(_) => "storage_error",
        }
    }

    /// Rejections happen before any side effect; the rest needed cleanup.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            JobError::FeatureDisabled(_)
                | JobError::AccountNotFound(_)
                | JobError::InsufficientBalance { .. }
                | JobError::UnsupportedPlatform(_)
                | JobError::InvalidRequest(_)
        )
    }
}

impl From<AdapterError> for JobError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::SynthesisUnavailable => JobError::FeatureDisabled(JobKind::Synthesis),
            AdapterError::UnsupportedPlatform(url) => JobError::UnsupportedPlatform(url),
            AdapterError::InvalidRequest(reason) => JobError::InvalidRequest(reason),
            AdapterError::NoSpeechDetected => JobError::NoSpeechDetected,
            AdapterError::Storage(err) => JobError::Storage(err.to_string()),
            other @ (AdapterError::Download(_)
            | AdapterError::Engine(_)
            | AdapterError::Timeout(_)) => JobError::Engine(other.to_string()),
        }
    }
}

impl From<LedgerError> for JobError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance { needed, available } => {
                JobError::InsufficientBalance { needed, available }
            }
            LedgerError::AccountNotFound(id) => JobError::AccountNotFound(id),
            LedgerError::InvalidAmount(amount) => {
                JobError::InvalidRequest(format!("invalid token amount {amount}"))
            }
            LedgerError::CorruptEntry { .. } => JobError::Storage(err.to_string()),
            LedgerError::Db(err) => JobError::Db(err),
        }
    }
}
