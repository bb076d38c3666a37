use axum::{
    body::StreamBody,
    extract::{Extension, Multipart},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::error;

use super::{JobError, JobKind, JobPayload, JobReceipt};
use crate::adapters::{is_allowed_upload, Voice, ALLOWED_UPLOAD_EXTENSIONS, VOICES};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::state::AppState;
use crate::storage::StorageError;

pub const DEFAULT_VOICE: &str = "en-US-AriaNeural";

pub const TOKENS_CHARGED_HEADER: &str = "x-tokens-charged";
pub const BALANCE_REMAINING_HEADER: &str = "x-balance-remaining";
const JOB_ID_HEADER: &str = "x-job-id";
const TRANSACTION_ID_HEADER: &str = "x-transaction-id";
const LANGUAGE_HEADER: &str = "x-language";

#[derive(Debug, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
}

fn header_value(value: impl ToString) -> Option<HeaderValue> {
    HeaderValue::from_str(&value.to_string()).ok()
}

/// Streams the artifact back as an attachment; charge and balance travel in
/// response headers.
async fn artifact_response(receipt: JobReceipt) -> AppResult<Response> {
    let artifact = &receipt.artifact;
    let file = match tokio::fs::File::open(&artifact.path).await {
        Ok(file) => file,
        Err(source) => {
            // The debit is already committed at this point.
            error!(
                job_id = %receipt.job_id,
                transaction_id = receipt.transaction_id,
                tokens = receipt.tokens_charged,
                path = %artifact.path.display(),
                error = %source,
                "committed artifact could not be opened"
            );
            return Err(StorageError::Io {
                path: artifact.path.clone(),
                source,
            }
            .into());
        }
    };

    let content_type = match receipt.kind {
        JobKind::Synthesis => "audio/mpeg",
        JobKind::Download => "video/mp4",
        JobKind::Transcription => "text/plain; charset=utf-8",
    };
    let disposition = header_value(format!(
        "attachment; filename=\"{}\"",
        artifact.download_name.replace('"', "'")
    ))
    .or_else(|| header_value(format!("attachment; filename=\"{}\"", artifact.file_name())));

    let body = StreamBody::new(ReaderStream::new(file));
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Some(disposition) = disposition {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    headers.insert(TOKENS_CHARGED_HEADER, HeaderValue::from(receipt.tokens_charged));
    headers.insert(BALANCE_REMAINING_HEADER, HeaderValue::from(receipt.balance_after));
    headers.insert(TRANSACTION_ID_HEADER, HeaderValue::from(receipt.transaction_id));
    if let Some(job_id) = header_value(receipt.job_id) {
        headers.insert(JOB_ID_HEADER, job_id);
    }
    if let Some(language) = artifact
        .language
        .as_deref()
        .and_then(|language| HeaderValue::from_str(language).ok())
    {
        headers.insert(LANGUAGE_HEADER, language);
    }
    Ok(response)
}

/// key: jobs-api -> metered job submission over HTTP
pub async fn submit_synthesis(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
    Json(request): Json<SynthesisRequest>,
) -> AppResult<Response> {
    let payload = JobPayload::Synthesis {
        text: request.text,
        voice: request.voice.unwrap_or_else(|| DEFAULT_VOICE.to_string()),
    };
    let receipt = state.orchestrator.submit_job(account_id, payload).await?;
    artifact_response(receipt).await
}

pub async fn submit_download(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
    Json(request): Json<DownloadRequest>,
) -> AppResult<Response> {
    let payload = JobPayload::Download { url: request.url };
    let receipt = state.orchestrator.submit_job(account_id, payload).await?;
    artifact_response(receipt).await
}

/// Multipart form with a `file` part (mp3 or mp4) and an optional `language`
/// part (`auto` or a language code).
pub async fn submit_transcription(
    Extension(state): Extension<AppState>,
    AuthUser { account_id, .. }: AuthUser,
    mut multipart: Multipart,
) -> AppResult<Response> {
    if !state.orchestrator.is_enabled(JobKind::Transcription) {
        return Err(JobError::FeatureDisabled(JobKind::Transcription).into());
    }

    let max_bytes = state.config.max_upload_bytes;
    let mut upload = None;
    let mut language = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadRequest(format!("invalid multipart body: {err}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                if !is_allowed_upload(&file_name) {
                    return Err(AppError::BadRequest(format!(
                        "only {} files can be transcribed",
                        ALLOWED_UPLOAD_EXTENSIONS.join(", ")
                    )));
                }
                let extension = file_name
                    .rsplit('.')
                    .next()
                    .unwrap_or("mp3")
                    .to_ascii_lowercase();

                let staged = state
                    .store
                    .stage_upload(JobKind::Transcription, account_id, &extension);
                let path = staged.path().to_path_buf();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|source| StorageError::Io {
                            path: parent.to_path_buf(),
                            source,
                        })?;
                }
                let io_error = |source: std::io::Error| StorageError::Io {
                    path: path.clone(),
                    source,
                };
                let mut file = tokio::fs::File::create(&path).await.map_err(io_error)?;
                let mut written = 0usize;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|err| AppError::BadRequest(format!("upload interrupted: {err}")))?
                {
                    written += chunk.len();
                    if written > max_bytes {
                        return Err(AppError::BadRequest(format!(
                            "upload exceeds {max_bytes} bytes"
                        )));
                    }
                    file.write_all(&chunk).await.map_err(io_error)?;
                }
                file.flush().await.map_err(io_error)?;
                if written == 0 {
                    return Err(AppError::BadRequest("uploaded file is empty".into()));
                }
                upload = Some(staged);
            }
            Some("language") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::BadRequest(format!("invalid language field: {err}")))?;
                language = Some(value.trim().to_string()).filter(|value| !value.is_empty());
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| AppError::BadRequest("missing `file` part".into()))?;
    let payload = JobPayload::Transcription {
        upload: upload.keep(),
        language,
    };
    let receipt = state.orchestrator.submit_job(account_id, payload).await?;
    artifact_response(receipt).await
}

pub async fn list_voices() -> Json<&'static [Voice]> {
    Json(VOICES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Artifact;
    use uuid::Uuid;

    fn receipt(path: &std::path::Path) -> JobReceipt {
        JobReceipt {
            job_id: Uuid::new_v4(),
            kind: JobKind::Download,
            artifact: Artifact::new(path, 4),
            tokens_charged: 1,
            balance_after: 9,
            transaction_id: 42,
            conversion_id: None,
        }
    }

    #[tokio::test]
    async fn artifact_is_streamed_with_charge_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video_1.mp4");
        std::fs::write(&path, b"ftyp").unwrap();

        let response = artifact_response(receipt(&path)).await.unwrap();
        assert_eq!(response.headers()[TRANSACTION_ID_HEADER], "42");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"ftyp");
    }

    #[tokio::test]
    async fn missing_artifact_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = artifact_response(receipt(&dir.path().join("gone.mp4")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(StorageError::Io { .. })));
    }
}
