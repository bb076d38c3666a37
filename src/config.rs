use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::JobKind;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// SQLite database location. Defaults to `sqlite://media_meter.db`.
pub static DATABASE_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("DATABASE_URL").unwrap_or_else(|| "sqlite://media_meter.db".to_string())
});

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `5000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(5000)
});

/// Per-capability switches. A disabled kind is never registered, so the
/// orchestrator reports it as `feature_disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub synthesis: bool,
    pub download: bool,
    pub transcription: bool,
    pub admin: bool,
    /// Password change for signed-in users.
    pub profile: bool,
    pub pricing: bool,
}

impl FeatureFlags {
    pub fn all() -> Self {
        Self {
            synthesis: true,
            download: true,
            transcription: true,
            admin: true,
            profile: true,
            pricing: true,
        }
    }

    pub fn is_enabled(&self, kind: JobKind) -> bool {
        match kind {
            JobKind::Synthesis => self.synthesis,
            JobKind::Download => self.download,
            JobKind::Transcription => self.transcription,
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Locations of the external engine executables.
#[derive(Debug, Clone)]
pub struct EngineBinaries {
    pub edge_tts: String,
    pub yt_dlp: String,
    pub whisper: String,
    pub whisper_model: String,
    pub ffprobe: String,
}

impl Default for EngineBinaries {
    fn default() -> Self {
        Self {
            edge_tts: "edge-tts".to_string(),
            yt_dlp: "yt-dlp".to_string(),
            whisper: "whisper".to_string(),
            whisper_model: "small".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

/// key: meter-config -> read-only settings injected into the core
#[derive(Debug, Clone)]
pub struct MeterConfig {
    pub features: FeatureFlags,
    pub chars_per_token: i64,
    pub transcription_tokens_per_minute: i64,
    pub max_text_length: usize,
    pub signup_bonus_tokens: i64,
    pub max_upload_bytes: usize,
    pub engine_timeout: Duration,
    pub audio_dir: PathBuf,
    pub video_dir: PathBuf,
    pub transcribe_dir: PathBuf,
    pub default_admin_email: String,
    pub default_admin_password: String,
    pub default_admin_tokens: i64,
    pub engines: EngineBinaries,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            features: FeatureFlags::all(),
            chars_per_token: 10,
            transcription_tokens_per_minute: 10,
            max_text_length: 5000,
            signup_bonus_tokens: 100,
            max_upload_bytes: 100 * 1024 * 1024,
            engine_timeout: Duration::from_secs(900),
            audio_dir: PathBuf::from("audio_files"),
            video_dir: PathBuf::from("video_files"),
            transcribe_dir: PathBuf::from("transcribe_files"),
            default_admin_email: "admin@example.com".to_string(),
            default_admin_password: "admin123".to_string(),
            default_admin_tokens: 999_999,
            engines: EngineBinaries::default(),
        }
    }
}

impl MeterConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let engine_defaults = EngineBinaries::default();
        Self {
            features: FeatureFlags {
                synthesis: read_flag("ENABLE_TTS", true),
                download: read_flag("ENABLE_VIDEO_DOWNLOAD", true),
                transcription: read_flag("ENABLE_TRANSCRIBE", true),
                admin: read_flag("ENABLE_ADMIN", true),
                profile: read_flag("ENABLE_PROFILE", true),
                pricing: read_flag("ENABLE_PRICING", true),
            },
            chars_per_token: read_positive("CHARS_PER_TOKEN", defaults.chars_per_token),
            transcription_tokens_per_minute: read_positive(
                "TRANSCRIBE_TOKENS_PER_MINUTE",
                defaults.transcription_tokens_per_minute,
            ),
            max_text_length: read_positive("MAX_TEXT_LENGTH", defaults.max_text_length),
            signup_bonus_tokens: read_env_parsed("SIGNUP_BONUS_TOKENS")
                .filter(|value: &i64| *value >= 0)
                .unwrap_or(defaults.signup_bonus_tokens),
            max_upload_bytes: read_positive("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            engine_timeout: Duration::from_secs(read_positive("ENGINE_TIMEOUT_SECS", 900_u64)),
            audio_dir: read_optional_env("AUDIO_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(defaults.audio_dir),
            video_dir: read_optional_env("VIDEO_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(defaults.video_dir),
            transcribe_dir: read_optional_env("TRANSCRIBE_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(defaults.transcribe_dir),
            default_admin_email: read_optional_env("DEFAULT_ADMIN_EMAIL")
                .unwrap_or(defaults.default_admin_email),
            default_admin_password: read_optional_env("DEFAULT_ADMIN_PASSWORD")
                .unwrap_or(defaults.default_admin_password),
            default_admin_tokens: read_env_parsed("DEFAULT_ADMIN_TOKENS")
                .filter(|value: &i64| *value >= 0)
                .unwrap_or(defaults.default_admin_tokens),
            engines: EngineBinaries {
                edge_tts: read_optional_env("EDGE_TTS_BIN").unwrap_or(engine_defaults.edge_tts),
                yt_dlp: read_optional_env("YTDLP_BIN").unwrap_or(engine_defaults.yt_dlp),
                whisper: read_optional_env("WHISPER_BIN").unwrap_or(engine_defaults.whisper),
                whisper_model: read_optional_env("WHISPER_MODEL")
                    .unwrap_or(engine_defaults.whisper_model),
                ffprobe: read_optional_env("FFPROBE_BIN").unwrap_or(engine_defaults.ffprobe),
            },
        }
    }

    pub fn dir_for(&self, kind: JobKind) -> &PathBuf {
        match kind {
            JobKind::Synthesis => &self.audio_dir,
            JobKind::Download => &self.video_dir,
            JobKind::Transcription => &self.transcribe_dir,
        }
    }
}

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    read_optional_env(key).and_then(|value| value.parse::<T>().ok())
}

fn read_positive<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    read_env_parsed::<T>(key)
        .filter(|value| *value > T::default())
        .unwrap_or(default)
}

fn read_flag(key: &str, default: bool) -> bool {
    read_optional_env(key)
        .map(|value| parse_flag(&value))
        .unwrap_or(default)
}

fn parse_flag(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}
