use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::transcription::language_code;
use super::{DurationProbe, FetchedVideo, SpeechEngine, SpeechRecognizer, Transcript, VideoFetcher};

const STDERR_TAIL_CHARS: usize = 2000;

/// Runs an engine executable to completion and returns its stdout. The child
/// is killed if the future is dropped, so aborting the job task stops it.
async fn run_engine<I, S>(program: &str, args: I) -> anyhow::Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(%program, "starting engine process");
    let output = command
        .output()
        .await
        .with_context(|| format!("failed to start {program}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let trimmed = stderr.trim();
        let start = trimmed
            .char_indices()
            .rev()
            .nth(STDERR_TAIL_CHARS)
            .map(|(index, _)| index)
            .unwrap_or(0);
        bail!("{program} exited with {}: {}", output.status, &trimmed[start..]);
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `edge-tts` command line client.
#[derive(Debug, Clone)]
pub struct EdgeTtsCli {
    program: String,
}

impl EdgeTtsCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl SpeechEngine for EdgeTtsCli {
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> anyhow::Result<()> {
        run_engine(
            &self.program,
            [
                OsStr::new("--voice"),
                OsStr::new(voice),
                OsStr::new("--text"),
                OsStr::new(text),
                OsStr::new("--write-media"),
                output.as_os_str(),
            ],
        )
        .await?;
        Ok(())
    }
}

/// `yt-dlp` with the remux settings of the download feature.
#[derive(Debug, Clone)]
pub struct YtDlpCli {
    program: String,
}

impl YtDlpCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl VideoFetcher for YtDlpCli {
    async fn fetch(&self, url: &str, output: &Path) -> anyhow::Result<FetchedVideo> {
        let stdout = run_engine(
            &self.program,
            [
                OsStr::new("--no-playlist"),
                OsStr::new("--no-progress"),
                OsStr::new("--quiet"),
                OsStr::new("--no-simulate"),
                OsStr::new("--format"),
                OsStr::new("mp4/bestvideo+bestaudio/best"),
                OsStr::new("--merge-output-format"),
                OsStr::new("mp4"),
                OsStr::new("--remux-video"),
                OsStr::new("mp4"),
                OsStr::new("--print"),
                OsStr::new("after_move:title"),
                OsStr::new("--output"),
                output.as_os_str(),
                OsStr::new(url),
            ],
        )
        .await?;

        let title = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or("Video")
            .to_string();

        let path = if output.exists() {
            output.to_path_buf()
        } else {
            let mp4 = output.with_extension("mp4");
            if !mp4.exists() {
                bail!("{} finished without producing {}", self.program, output.display());
            }
            mp4
        };
        Ok(FetchedVideo { path, title })
    }
}

/// `whisper` command line tool writing a txt transcript next to the input.
#[derive(Debug, Clone)]
pub struct WhisperCli {
    program: String,
    model: String,
}

impl WhisperCli {
    pub fn new(program: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            model: model.into(),
        }
    }
}

fn detected_language(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        line.trim()
            .strip_prefix("Detected language:")
            .map(|name| language_code(name.trim()))
    })
}

#[async_trait]
impl SpeechRecognizer for WhisperCli {
    async fn transcribe(
        &self,
        input: &Path,
        language: Option<&str>,
    ) -> anyhow::Result<Transcript> {
        let output_dir = input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut args: Vec<&OsStr> = vec![
            input.as_os_str(),
            OsStr::new("--model"),
            OsStr::new(&self.model),
            OsStr::new("--output_format"),
            OsStr::new("txt"),
            OsStr::new("--output_dir"),
            output_dir.as_os_str(),
            OsStr::new("--temperature"),
            OsStr::new("0"),
            OsStr::new("--no_speech_threshold"),
            OsStr::new("0.6"),
            OsStr::new("--verbose"),
            OsStr::new("False"),
        ];
        if let Some(language) = language {
            args.push(OsStr::new("--language"));
            args.push(OsStr::new(language));
        }

        let stdout = run_engine(&self.program, args).await?;

        let stem = input
            .file_stem()
            .context("transcription input has no file name")?;
        let mut transcript_name = stem.to_os_string();
        transcript_name.push(".txt");
        let transcript_path = output_dir.join(transcript_name);

        let text = tokio::fs::read_to_string(&transcript_path)
            .await
            .with_context(|| format!("reading {}", transcript_path.display()))?;
        if let Err(err) = tokio::fs::remove_file(&transcript_path).await {
            debug!(?err, path = %transcript_path.display(), "could not remove engine transcript");
        }

        Ok(Transcript {
            text,
            language: language.map(str::to_string).or_else(|| detected_language(&stdout)),
        })
    }
}

/// `ffprobe` reading only the container's duration field.
#[derive(Debug, Clone)]
pub struct FfprobeCli {
    program: String,
}

impl FfprobeCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DurationProbe for FfprobeCli {
    async fn duration_seconds(&self, input: &Path) -> anyhow::Result<f64> {
        let stdout = run_engine(
            &self.program,
            [
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-show_entries"),
                OsStr::new("format=duration"),
                OsStr::new("-of"),
                OsStr::new("default=noprint_wrappers=1:nokey=1"),
                input.as_os_str(),
            ],
        )
        .await?;

        let raw = stdout.trim();
        raw.parse::<f64>()
            .with_context(|| format!("unexpected duration `{raw}` from {}", self.program))
    }
}
