use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::accounts::AccountError;
use crate::admin::GrantError;
use crate::jobs::JobError;
use crate::metering::LedgerError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Grant(#[from] GrantError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0} is disabled")]
    FeatureDisabled(&'static str),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    /// Machine-readable reason returned alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Job(err) => err.code(),
            AppError::Grant(err) => err.code(),
            AppError::Account(err) => err.code(),
            AppError::Ledger(LedgerError::InsufficientBalance { .. }) => "insufficient_balance",
            AppError::Ledger(LedgerError::InvalidAmount(_)) => "invalid_amount",
            AppError::Ledger(LedgerError::AccountNotFound(_)) | AppError::NotFound => "not_found",
            AppError::Ledger(_) | AppError::Db(_) | AppError::Storage(_) => "storage_error",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::FeatureDisabled(_) => "feature_disabled",
            AppError::BadRequest(_) => "bad_request",
            AppError::Message(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Job(err) => match err {
                JobError::FeatureDisabled(_) => StatusCode::FORBIDDEN,
                JobError::AccountNotFound(_) => StatusCode::NOT_FOUND,
                JobError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
                JobError::UnsupportedPlatform(_) | JobError::InvalidRequest(_) => {
                    StatusCode::BAD_REQUEST
                }
                JobError::NoSpeechDetected => StatusCode::UNPROCESSABLE_ENTITY,
                JobError::Engine(_) => StatusCode::BAD_GATEWAY,
                JobError::Storage(_) | JobError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Grant(err) => match err {
                GrantError::FeatureDisabled | GrantError::Forbidden => StatusCode::FORBIDDEN,
                GrantError::TargetNotFound(_) => StatusCode::NOT_FOUND,
                GrantError::SelfGrantRejected => StatusCode::CONFLICT,
                GrantError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
                GrantError::InsufficientBalance { .. } => StatusCode::CONFLICT,
                GrantError::Ledger(_) | GrantError::Account(_) | GrantError::Db(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::Account(err) => match err {
                AccountError::EmailTaken => StatusCode::CONFLICT,
                AccountError::InvalidEmail | AccountError::WeakPassword(_) => {
                    StatusCode::BAD_REQUEST
                }
                AccountError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AccountError::NotFound => StatusCode::NOT_FOUND,
                AccountError::Hash(_) | AccountError::Ledger(_) | AccountError::Db(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::Ledger(LedgerError::InsufficientBalance { .. }) => {
                StatusCode::PAYMENT_REQUIRED
            }
            AppError::Ledger(LedgerError::InvalidAmount(_)) => StatusCode::BAD_REQUEST,
            AppError::Ledger(LedgerError::AccountNotFound(_)) | AppError::NotFound => {
                StatusCode::NOT_FOUND
            }
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden | AppError::FeatureDisabled(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Ledger(_) | AppError::Db(_) | AppError::Storage(_) | AppError::Message(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        let shortfall = match &self {
            AppError::Job(JobError::InsufficientBalance { needed, available })
            | AppError::Ledger(LedgerError::InsufficientBalance { needed, available })
            | AppError::Grant(GrantError::InsufficientBalance { needed, available }) => {
                Some((*needed, *available))
            }
            _ => None,
        };
        if let Some((needed, available)) = shortfall {
            body["needed"] = json!(needed);
            body["available"] = json!(available);
        }

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
