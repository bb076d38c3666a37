#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use media_meter::adapters::{
    DurationProbe, FetchedVideo, SpeechEngine, SpeechRecognizer, Transcript, VideoFetcher,
};
use media_meter::config::{FeatureFlags, MeterConfig};
use media_meter::jobs::JobKind;
use media_meter::{db, AppState, ArtifactStore, CapabilityRegistry, EngineSet};
use tempfile::TempDir;

pub const TEST_JWT_SECRET: &str = "test-secret";

pub fn init_jwt_secret() {
    std::env::set_var("JWT_SECRET", TEST_JWT_SECRET);
}

#[derive(Default)]
pub struct FakeSpeech {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
    pub fail: bool,
    pub panic: bool,
}

#[async_trait]
impl SpeechEngine for FakeSpeech {
    async fn synthesize(&self, text: &str, _voice: &str, output: &Path) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Partial output exists before the engine finishes.
        tokio::fs::write(output, format!("ID3 {text}")).await?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic {
            panic!("speech engine crashed");
        }
        if self.fail {
            anyhow::bail!("voice service returned 503");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    pub calls: AtomicUsize,
    pub fail: bool,
    /// Hangs after the partial file is written.
    pub stall: Option<Duration>,
}

#[async_trait]
impl VideoFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str, output: &Path) -> anyhow::Result<FetchedVideo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut part = output.as_os_str().to_os_string();
        part.push(".part");
        tokio::fs::write(PathBuf::from(part), b"partial").await?;
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        if self.fail {
            tokio::fs::write(output, b"half a video").await?;
            anyhow::bail!("HTTP Error 403: Forbidden");
        }
        tokio::fs::write(output, b"\x00\x00\x00\x18ftypmp42").await?;
        Ok(FetchedVideo {
            path: output.to_path_buf(),
            title: "Cats: the movie".to_string(),
        })
    }
}

pub struct FakeRecognizer {
    pub calls: AtomicUsize,
    pub text: String,
    pub language: Option<String>,
}

impl FakeRecognizer {
    pub fn saying(text: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            text: text.to_string(),
            language: Some("en".to_string()),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn transcribe(
        &self,
        _input: &Path,
        _language: Option<&str>,
    ) -> anyhow::Result<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Transcript {
            text: self.text.clone(),
            language: self.language.clone(),
        })
    }
}

pub struct FakeProbe {
    pub seconds: f64,
}

#[async_trait]
impl DurationProbe for FakeProbe {
    async fn duration_seconds(&self, _input: &Path) -> anyhow::Result<f64> {
        Ok(self.seconds)
    }
}

pub struct Fakes {
    pub speech: Arc<FakeSpeech>,
    pub fetcher: Arc<FakeFetcher>,
    pub recognizer: Arc<FakeRecognizer>,
    pub probe: Arc<FakeProbe>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            speech: Arc::new(FakeSpeech::default()),
            fetcher: Arc::new(FakeFetcher::default()),
            recognizer: Arc::new(FakeRecognizer::saying("hello   world")),
            probe: Arc::new(FakeProbe { seconds: 90.0 }),
        }
    }
}

impl Fakes {
    fn engines(&self) -> EngineSet {
        EngineSet {
            speech: self.speech.clone(),
            fetcher: self.fetcher.clone(),
            recognizer: self.recognizer.clone(),
            probe: self.probe.clone(),
        }
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub state: AppState,
    pub fakes: Fakes,
}

pub fn test_config(root: &Path) -> MeterConfig {
    MeterConfig {
        audio_dir: root.join("audio_files"),
        video_dir: root.join("video_files"),
        transcribe_dir: root.join("transcribe_files"),
        engine_timeout: Duration::from_secs(5),
        ..MeterConfig::default()
    }
}

pub async fn harness() -> Harness {
    harness_with(Fakes::default(), |_| {}).await
}

pub async fn harness_with(fakes: Fakes, adjust: impl FnOnce(&mut MeterConfig)) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path());
    adjust(&mut config);

    let pool = db::connect_in_memory().await.expect("in-memory database");
    let store = ArtifactStore::from_config(&config);
    store.ensure_dirs(&JobKind::ALL).await.expect("artifact dirs");
    let registry = CapabilityRegistry::from_config(&config, fakes.engines());
    let state = AppState::new(config, pool, registry, store);

    Harness { dir, state, fakes }
}

pub fn only(features: FeatureFlags) -> impl FnOnce(&mut MeterConfig) {
    move |config| config.features = features
}

impl Harness {
    /// Inserts an account directly and funds it through the ledger.
    pub async fn account(&self, email: &str, tokens: i64) -> i64 {
        self.insert_account(email, tokens, false).await
    }

    pub async fn admin(&self, email: &str, tokens: i64) -> i64 {
        self.insert_account(email, tokens, true).await
    }

    async fn insert_account(&self, email: &str, tokens: i64, is_admin: bool) -> i64 {
        let id = sqlx::query(
            "INSERT INTO accounts (email, password_hash, is_admin, tokens, created_at) VALUES ($1, 'x', $2, 0, $3)",
        )
        .bind(email)
        .bind(is_admin)
        .bind(Utc::now())
        .execute(&self.state.pool)
        .await
        .expect("insert account")
        .last_insert_rowid();
        if tokens > 0 {
            self.state
                .ledger
                .credit(id, tokens, "Test funding", None)
                .await
                .expect("fund account");
        }
        id
    }

    pub async fn balance(&self, account_id: i64) -> i64 {
        self.state.ledger.balance(account_id).await.expect("balance")
    }

    pub async fn assert_consistent(&self, account_id: i64) {
        let audit = self.state.ledger.verify(account_id).await.expect("audit");
        assert_eq!(audit.balance, audit.journal_sum, "ledger out of sync: {audit:?}");
    }

    pub async fn entry_count(&self, account_id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries WHERE account_id = $1")
            .bind(account_id)
            .fetch_one(&self.state.pool)
            .await
            .expect("count entries")
    }

    pub async fn conversion_count(&self, account_id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM conversions WHERE account_id = $1")
            .bind(account_id)
            .fetch_one(&self.state.pool)
            .await
            .expect("count conversions")
    }

    pub fn files_in(&self, kind: JobKind) -> Vec<PathBuf> {
        let dir = self.state.store.dir_for(kind);
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .expect("read artifact dir")
            .map(|entry| entry.expect("dir entry").path())
            .collect();
        files.sort();
        files
    }

    /// Lists `kind`'s directory once aborted engine tasks have had a chance
    /// to be dropped by the runtime.
    pub async fn files_after_abort(&self, kind: JobKind) -> Vec<PathBuf> {
        for _ in 0..50 {
            if self.files_in(kind).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.files_in(kind)
    }

    /// Stages an upload the way the HTTP layer does.
    pub async fn staged_upload(&self, account_id: i64, extension: &str) -> PathBuf {
        let staged = self
            .state
            .store
            .stage_upload(JobKind::Transcription, account_id, extension);
        self.state
            .store
            .write(staged.path(), b"ID3 fake media")
            .await
            .expect("write upload");
        staged.keep()
    }
}
