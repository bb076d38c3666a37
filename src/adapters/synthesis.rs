use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use super::{is_missing_binary, AdapterError, Artifact, CapabilityAdapter, Estimate, SpeechEngine};
use crate::jobs::{JobKind, JobPayload};
use crate::metering::{normalize_tts_text, CostBasis};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Voice {
    pub id: &'static str,
    pub label: &'static str,
}

pub const VOICES: &[Voice] = &[
    Voice {
        id: "en-US-AriaNeural",
        label: "English (US), Aria",
    },
    Voice {
        id: "en-US-GuyNeural",
        label: "English (US), Guy",
    },
    Voice {
        id: "en-GB-SoniaNeural",
        label: "English (UK), Sonia",
    },
    Voice {
        id: "en-GB-RyanNeural",
        label: "English (UK), Ryan",
    },
    Voice {
        id: "ru-RU-SvetlanaNeural",
        label: "Russian, Svetlana",
    },
    Voice {
        id: "ru-RU-DmitryNeural",
        label: "Russian, Dmitry",
    },
    Voice {
        id: "uk-UA-PolinaNeural",
        label: "Ukrainian, Polina",
    },
    Voice {
        id: "uk-UA-OstapNeural",
        label: "Ukrainian, Ostap",
    },
];

pub fn is_known_voice(id: &str) -> bool {
    VOICES.iter().any(|voice| voice.id == id)
}

/// key: synthesis-adapter -> normalized text + voice -> mp3
pub struct SynthesisAdapter {
    engine: Arc<dyn SpeechEngine>,
    max_text_length: usize,
}

impl SynthesisAdapter {
    pub fn new(engine: Arc<dyn SpeechEngine>, max_text_length: usize) -> Self {
        Self {
            engine,
            max_text_length,
        }
    }
}

fn synthesis_input(payload: &JobPayload) -> Result<(&str, &str), AdapterError> {
    match payload {
        JobPayload::Synthesis { text, voice } => Ok((text, voice)),
        other => Err(AdapterError::InvalidRequest(format!(
            "synthesis adapter cannot run a {} job",
            other.kind()
        ))),
    }
}

#[async_trait]
impl CapabilityAdapter for SynthesisAdapter {
    fn kind(&self) -> JobKind {
        JobKind::Synthesis
    }

    fn output_extension(&self) -> &'static str {
        "mp3"
    }

    async fn prepare(&self, payload: &JobPayload) -> Result<Estimate, AdapterError> {
        let (text, voice) = synthesis_input(payload)?;
        if !is_known_voice(voice) {
            return Err(AdapterError::InvalidRequest(format!("unknown voice {voice}")));
        }
        let normalized = normalize_tts_text(text);
        let length = normalized.chars().count();
        if length == 0 {
            return Err(AdapterError::InvalidRequest("text is empty".to_string()));
        }
        if length > self.max_text_length {
            return Err(AdapterError::InvalidRequest(format!(
                "text is {length} characters, the limit is {}",
                self.max_text_length
            )));
        }
        Ok(Estimate::new(CostBasis::Characters(length)).with_label(voice))
    }

    async fn execute(
        &self,
        payload: &JobPayload,
        _estimate: &Estimate,
        output: &Path,
    ) -> Result<Artifact, AdapterError> {
        let (text, voice) = synthesis_input(payload)?;
        let normalized = normalize_tts_text(text);

        if let Err(err) = self.engine.synthesize(&normalized, voice, output).await {
            if is_missing_binary(&err) {
                warn!(?err, "speech engine is not installed");
                return Err(AdapterError::SynthesisUnavailable);
            }
            return Err(AdapterError::Engine(format!("{err:#}")));
        }

        let size_bytes = tokio::fs::metadata(output)
            .await
            .map(|meta| meta.len())
            .map_err(|err| AdapterError::Engine(format!("speech engine wrote no audio: {err}")))?;
        if size_bytes == 0 {
            return Err(AdapterError::Engine("speech engine wrote an empty file".to_string()));
        }

        Ok(Artifact::new(output, size_bytes))
    }
}
