use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    is_missing_binary, AdapterError, Artifact, CapabilityAdapter, DurationProbe, Estimate,
    SpeechRecognizer,
};
use crate::jobs::{JobKind, JobPayload};
use crate::metering::CostBasis;

pub const ALLOWED_UPLOAD_EXTENSIONS: &[&str] = &["mp3", "mp4"];

const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("en", "English"),
    ("ru", "Russian"),
    ("uk", "Ukrainian"),
    ("de", "German"),
    ("fr", "French"),
    ("es", "Spanish"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("zh", "Chinese"),
    ("ar", "Arabic"),
    ("tr", "Turkish"),
    ("pl", "Polish"),
    ("nl", "Dutch"),
    ("sv", "Swedish"),
    ("no", "Norwegian"),
    ("da", "Danish"),
    ("fi", "Finnish"),
    ("cs", "Czech"),
    ("hu", "Hungarian"),
    ("ro", "Romanian"),
    ("bg", "Bulgarian"),
    ("hr", "Croatian"),
    ("sk", "Slovak"),
    ("sl", "Slovenian"),
    ("et", "Estonian"),
    ("lv", "Latvian"),
    ("lt", "Lithuanian"),
    ("el", "Greek"),
    ("he", "Hebrew"),
    ("hi", "Hindi"),
    ("th", "Thai"),
    ("vi", "Vietnamese"),
    ("id", "Indonesian"),
    ("ms", "Malay"),
    ("tl", "Tagalog"),
];

/// Display name for a language code; unknown codes are upper-cased.
pub fn language_name(code: &str) -> String {
    let code = code.trim().to_ascii_lowercase();
    LANGUAGE_NAMES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| code.to_ascii_uppercase())
}

/// Reverse of [`language_name`]; unknown names are lower-cased.
pub(crate) fn language_code(name: &str) -> String {
    LANGUAGE_NAMES
        .iter()
        .find(|(_, known)| known.eq_ignore_ascii_case(name))
        .map(|(code, _)| code.to_string())
        .unwrap_or_else(|| name.to_ascii_lowercase())
}

/// `None` means auto-detect.
pub(crate) fn requested_language(language: Option<&str>) -> Option<&str> {
    language
        .map(str::trim)
        .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("auto"))
}

pub fn is_allowed_upload(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ALLOWED_UPLOAD_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// key: transcription-adapter -> metadata probe + recognizer -> txt
pub struct TranscriptionAdapter {
    recognizer: Arc<dyn SpeechRecognizer>,
    probe: Arc<dyn DurationProbe>,
}

impl TranscriptionAdapter {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, probe: Arc<dyn DurationProbe>) -> Self {
        Self { recognizer, probe }
    }
}

fn transcription_input(payload: &JobPayload) -> Result<(&Path, Option<&str>), AdapterError> {
    match payload {
        JobPayload::Transcription { upload, language } => {
            Ok((upload.as_path(), requested_language(language.as_deref())))
        }
        other => Err(AdapterError::InvalidRequest(format!(
            "transcription adapter cannot run a {} job",
            other.kind()
        ))),
    }
}

#[async_trait]
impl CapabilityAdapter for TranscriptionAdapter {
    fn kind(&self) -> JobKind {
        JobKind::Transcription
    }

    fn output_extension(&self) -> &'static str {
        "txt"
    }

    async fn prepare(&self, payload: &JobPayload) -> Result<Estimate, AdapterError> {
        let (upload, language) = transcription_input(payload)?;
        let name = upload.to_string_lossy();
        if !is_allowed_upload(&name) {
            return Err(AdapterError::InvalidRequest(format!(
                "only {} files can be transcribed",
                ALLOWED_UPLOAD_EXTENSIONS.join(", ")
            )));
        }

        let seconds = self.probe.duration_seconds(upload).await.map_err(|err| {
            if is_missing_binary(&err) {
                AdapterError::Engine(format!("duration probe unavailable: {err:#}"))
            } else {
                AdapterError::InvalidRequest(format!("could not read media duration: {err:#}"))
            }
        })?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(AdapterError::InvalidRequest(format!(
                "media reports an invalid duration ({seconds})"
            )));
        }

        Ok(Estimate::new(CostBasis::Duration(seconds)).with_label(language.unwrap_or("auto")))
    }

    async fn execute(
        &self,
        payload: &JobPayload,
        estimate: &Estimate,
        output: &Path,
    ) -> Result<Artifact, AdapterError> {
        let (upload, language) = transcription_input(payload)?;

        let transcript = self
            .recognizer
            .transcribe(upload, language)
            .await
            .map_err(|err| AdapterError::Engine(format!("{err:#}")))?;

        let text = transcript.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return Err(AdapterError::NoSpeechDetected);
        }

        tokio::fs::write(output, text.as_bytes())
            .await
            .map_err(|source| crate::storage::StorageError::Io {
                path: output.to_path_buf(),
                source,
            })?;

        let mut artifact = Artifact::new(output, text.len() as u64);
        if let CostBasis::Duration(seconds) = estimate.basis {
            artifact.duration_seconds = Some(seconds);
        }
        artifact.language = language
            .map(str::to_string)
            .or(transcript.language)
            .map(|code| language_name(&code));
        if let Some(stem) = upload.file_stem() {
            artifact.download_name = format!("transcription_{}.txt", stem.to_string_lossy());
        }
        Ok(artifact)
    }
}
