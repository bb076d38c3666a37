use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::JobKind;
use crate::adapters::{
    CapabilityAdapter, DownloadAdapter, DurationProbe, EdgeTtsCli, FfprobeCli, SpeechEngine,
    SpeechRecognizer, SynthesisAdapter, TranscriptionAdapter, VideoFetcher, WhisperCli, YtDlpCli,
};
use crate::config::{EngineBinaries, MeterConfig};

/// External engines the adapters are built from. Constructed once at start-up.
#[derive(Clone)]
pub struct EngineSet {
    pub speech: Arc<dyn SpeechEngine>,
    pub fetcher: Arc<dyn VideoFetcher>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub probe: Arc<dyn DurationProbe>,
}

impl EngineSet {
    pub fn from_binaries(binaries: &EngineBinaries) -> Self {
        Self {
            speech: Arc::new(EdgeTtsCli::new(&binaries.edge_tts)),
            fetcher: Arc::new(YtDlpCli::new(&binaries.yt_dlp)),
            recognizer: Arc::new(WhisperCli::new(&binaries.whisper, &binaries.whisper_model)),
            probe: Arc::new(FfprobeCli::new(&binaries.ffprobe)),
        }
    }
}

/// key: capability-registry -> enabled job kinds only
///
/// A kind that is switched off is simply never registered; lookups for it
/// come back empty and the orchestrator reports `feature_disabled`.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    adapters: HashMap<JobKind, Arc<dyn CapabilityAdapter>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MeterConfig, engines: EngineSet) -> Self {
        let mut registry = Self::new();
        if config.features.synthesis {
            registry.register(Arc::new(SynthesisAdapter::new(
                engines.speech.clone(),
                config.max_text_length,
            )));
        }
        if config.features.download {
            registry.register(Arc::new(DownloadAdapter::new(engines.fetcher.clone())));
        }
        if config.features.transcription {
            registry.register(Arc::new(TranscriptionAdapter::new(
                engines.recognizer.clone(),
                engines.probe.clone(),
            )));
        }
        info!(kinds = ?registry.kinds(), "capability registry ready");
        registry
    }

    /// Replaces any adapter already registered for the same kind.
    pub fn register(&mut self, adapter: Arc<dyn CapabilityAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn CapabilityAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn is_enabled(&self, kind: JobKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        JobKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }
}
