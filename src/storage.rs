use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MeterConfig;
use crate::jobs::JobKind;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// key: artifact-store -> per-kind directories + observable best-effort cleanup
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    audio_dir: PathBuf,
    video_dir: PathBuf,
    transcribe_dir: PathBuf,
    cleanup_failures: Arc<AtomicU64>,
}

impl ArtifactStore {
    pub fn new(audio_dir: PathBuf, video_dir: PathBuf, transcribe_dir: PathBuf) -> Self {
        Self {
            audio_dir,
            video_dir,
            transcribe_dir,
            cleanup_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &MeterConfig) -> Self {
        Self::new(
            config.audio_dir.clone(),
            config.video_dir.clone(),
            config.transcribe_dir.clone(),
        )
    }

    /// Single root with one subdirectory per kind.
    pub fn under(root: &Path) -> Self {
        Self::new(
            root.join("audio_files"),
            root.join("video_files"),
            root.join("transcribe_files"),
        )
    }

    pub fn dir_for(&self, kind: JobKind) -> &Path {
        match kind {
            JobKind::Synthesis => &self.audio_dir,
            JobKind::Download => &self.video_dir,
            JobKind::Transcription => &self.transcribe_dir,
        }
    }

    pub async fn ensure_dirs(&self, kinds: &[JobKind]) -> Result<(), StorageError> {
        for kind in kinds {
            let dir = self.dir_for(*kind);
            fs::create_dir_all(dir)
                .await
                .map_err(|err| StorageError::io(dir, err))?;
        }
        Ok(())
    }

    /// Reserves a unique path for a job's output. Nothing is created on disk;
    /// whatever ends up at the path is deleted when the guard drops unarmed.
    pub fn stage(&self, kind: JobKind, account_id: i64, extension: &str) -> StagedFile {
        let prefix = match kind {
            JobKind::Synthesis => "audio",
            JobKind::Download => "video",
            JobKind::Transcription => "transcribe",
        };
        self.stage_named(kind, prefix, account_id, extension)
    }

    /// Same as [`ArtifactStore::stage`] for an uploaded input file.
    pub fn stage_upload(&self, kind: JobKind, account_id: i64, extension: &str) -> StagedFile {
        self.stage_named(kind, "upload", account_id, extension)
    }

    fn stage_named(
        &self,
        kind: JobKind,
        prefix: &str,
        account_id: i64,
        extension: &str,
    ) -> StagedFile {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!(
            "{prefix}_{account_id}_{timestamp}_{}.{extension}",
            &suffix[..8]
        );
        self.adopt(self.dir_for(kind).join(name))
    }

    /// Takes ownership of an existing path: it is removed on drop unless kept.
    pub fn adopt(&self, path: PathBuf) -> StagedFile {
        StagedFile {
            path,
            store: self.clone(),
            armed: true,
        }
    }

    pub async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::io(parent, err))?;
        }
        fs::write(path, bytes)
            .await
            .map_err(|err| StorageError::io(path, err))
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).await.is_ok()
    }

    pub async fn size(&self, path: &Path) -> Result<u64, StorageError> {
        fs::metadata(path)
            .await
            .map(|meta| meta.len())
            .map_err(|err| StorageError::io(path, err))
    }

    /// Deletes a file; a missing file is not an error.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::io(path, err)),
        }
    }

    /// Best-effort removal used on failure paths. Failures are logged and
    /// counted but never returned.
    pub fn discard(&self, path: &Path) -> bool {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "discarded artifact");
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => true,
            Err(err) => {
                self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
                metrics::increment_counter!("media_meter_cleanup_failures_total");
                warn!(?err, path = %path.display(), "failed to remove artifact during cleanup");
                false
            }
        }
    }

    pub fn cleanup_failures(&self) -> u64 {
        self.cleanup_failures.load(Ordering::Relaxed)
    }
}

/// A file owned by an in-flight job. Dropping it while armed discards the
/// file through [`ArtifactStore::discard`].
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    store: ArtifactStore,
    armed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hands the file over to the caller; it will no longer be deleted.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.armed {
            self.store.discard(&self.path);
        }
    }
}
