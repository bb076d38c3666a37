use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use super::{AdapterError, Artifact, CapabilityAdapter, Estimate, VideoFetcher};
use crate::jobs::{JobKind, JobPayload};
use crate::metering::CostBasis;

static TIKTOK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://(?:www\.)?tiktok\.com/\S+").expect("valid regex"));
static YOUTUBE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:www\.)?(?:youtube\.com/watch\?v=|youtu\.be/)\S+").expect("valid regex")
});
static REELS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:www\.)?instagram\.com/(?:reel|reels)/\S+").expect("valid regex")
});
static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f]+"#).expect("valid regex"));

/// Leftovers the extraction engine may create next to its target.
const PARTIAL_SUFFIXES: &[&str] = &[
    ".mp4", ".webm", ".mkv", ".m4a", ".part", ".fmp4", ".mp4.part", ".ytdl",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Platform {
    TikTok,
    YouTube,
    Reels,
}

impl Platform {
    /// Classifies a URL by shape alone, without any network access.
    pub fn detect(url: &str) -> Option<Self> {
        if TIKTOK.is_match(url) {
            Some(Platform::TikTok)
        } else if YOUTUBE.is_match(url) {
            Some(Platform::YouTube)
        } else if REELS.is_match(url) {
            Some(Platform::Reels)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TikTok => "TikTok",
            Platform::YouTube => "YouTube",
            Platform::Reels => "Reels",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// key: download-adapter -> platform check + fetch + partial cleanup
pub struct DownloadAdapter {
    fetcher: Arc<dyn VideoFetcher>,
}

impl DownloadAdapter {
    pub fn new(fetcher: Arc<dyn VideoFetcher>) -> Self {
        Self { fetcher }
    }

    async fn finish(&self, fetched: PathBuf, output: &Path) -> Result<u64, AdapterError> {
        if fetched != output {
            tokio::fs::rename(&fetched, output).await.map_err(|err| {
                AdapterError::Download(format!(
                    "could not move {} into place: {err}",
                    fetched.display()
                ))
            })?;
        }
        let size = tokio::fs::metadata(output)
            .await
            .map(|meta| meta.len())
            .map_err(|err| AdapterError::Download(format!("downloaded file is missing: {err}")))?;
        if size == 0 {
            return Err(AdapterError::Download("downloaded file is empty".to_string()));
        }
        Ok(size)
    }
}

fn download_url(payload: &JobPayload) -> Result<&str, AdapterError> {
    match payload {
        JobPayload::Download { url } => Ok(url.trim()),
        other => Err(AdapterError::InvalidRequest(format!(
            "download adapter cannot run a {} job",
            other.kind()
        ))),
    }
}

/// Removes the engine's temporary files around `output`, keeping `output`
/// itself for the caller's guard.
pub(crate) fn remove_partials(output: &Path, fetched: Option<&Path>) {
    let mut candidates = Vec::new();
    let stem = output.with_extension("");
    for suffix in PARTIAL_SUFFIXES {
        let mut name = stem.clone().into_os_string();
        name.push(suffix);
        candidates.push(PathBuf::from(name));
    }
    if let Some(fetched) = fetched {
        candidates.push(fetched.to_path_buf());
    }

    for candidate in candidates.into_iter().filter(|path| path != output) {
        match std::fs::remove_file(&candidate) {
            Ok(()) => debug!(path = %candidate.display(), "removed partial download"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                metrics::increment_counter!("media_meter_cleanup_failures_total");
                warn!(?err, path = %candidate.display(), "failed to remove partial download");
            }
        }
    }
}

/// Runs [`remove_partials`] when dropped, which covers an aborted fetch as
/// well as every return path.
struct PartialFiles {
    output: PathBuf,
    fetched: Option<PathBuf>,
}

impl Drop for PartialFiles {
    fn drop(&mut self) {
        remove_partials(&self.output, self.fetched.as_deref());
    }
}

pub(crate) fn download_name(title: &str) -> String {
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(title.trim(), "_");
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        "video.mp4".to_string()
    } else {
        format!("{cleaned}.mp4")
    }
}

#[async_trait]
impl CapabilityAdapter for DownloadAdapter {
    fn kind(&self) -> JobKind {
        JobKind::Download
    }

    fn output_extension(&self) -> &'static str {
        "mp4"
    }

    async fn prepare(&self, payload: &JobPayload) -> Result<Estimate, AdapterError> {
        let url = download_url(payload)?;
        let platform =
            Platform::detect(url).ok_or_else(|| AdapterError::UnsupportedPlatform(url.to_string()))?;
        Ok(Estimate::new(CostBasis::Flat).with_label(platform.as_str()))
    }

    async fn execute(
        &self,
        payload: &JobPayload,
        _estimate: &Estimate,
        output: &Path,
    ) -> Result<Artifact, AdapterError> {
        let url = download_url(payload)?;
        let mut partials = PartialFiles {
            output: output.to_path_buf(),
            fetched: None,
        };

        let fetched = self
            .fetcher
            .fetch(url, output)
            .await
            .map_err(|err| AdapterError::Download(format!("{err:#}")))?;
        partials.fetched = Some(fetched.path.clone());

        let size_bytes = self.finish(fetched.path.clone(), output).await?;
        let mut artifact = Artifact::new(output, size_bytes);
        artifact.download_name = download_name(&fetched.title);
        artifact.title = Some(fetched.title);
        Ok(artifact)
    }
}
