//! Synthesis invoker backed by the Piper CLI.
//!
//! The text is written to Piper's stdin, never placed on a command line, and
//! Piper writes a WAV file into a scratch location that is removed when the
//! call returns. The child is spawned with `kill_on_drop`, so a caller that
//! abandons the future (client disconnect) also terminates the engine; on
//! timeout the child is killed and reaped before the error is returned.

use crate::config::MurmurConfig;
use crate::utils::{diagnostic_text, find_executable};
use crate::voice::VoiceEntry;
use crate::{MurmurError, Result};
use async_trait::async_trait;
use std::io::Cursor;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Synthesized speech as an in-memory WAV file.
#[derive(Clone, Debug)]
pub struct AudioArtifact {
    pub voice: String,
    pub bytes: Vec<u8>,
}

impl AudioArtifact {
    pub fn new(voice: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            voice: voice.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Playback length from the WAV header, if the bytes parse as WAV.
    pub fn duration_secs(&self) -> Option<f64> {
        let reader = hound::WavReader::new(Cursor::new(&self.bytes)).ok()?;
        let spec = reader.spec();
        if spec.sample_rate == 0 || spec.channels == 0 {
            return None;
        }
        let frames = reader.len() as f64 / spec.channels as f64;
        Some(frames / spec.sample_rate as f64)
    }
}

/// Turns text into audio for a given voice.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceEntry) -> Result<AudioArtifact>;

    /// Whether the engine can currently be launched.
    fn available(&self) -> bool {
        true
    }
}

#[derive(Clone, Debug)]
pub struct PiperSynthesizer {
    piper_bin: PathBuf,
    timeout: Duration,
    scratch_dir: Option<PathBuf>,
}

impl PiperSynthesizer {
    pub fn new(piper_bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            piper_bin: piper_bin.into(),
            timeout,
            scratch_dir: None,
        }
    }

    pub fn from_config(cfg: &MurmurConfig) -> Self {
        Self::new(cfg.piper_bin.clone(), cfg.synthesis_timeout)
    }

    /// Directory for Piper's output files; defaults to the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    fn scratch_wav(&self) -> Result<tempfile::TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("murmur-tts-").suffix(".wav");
        let file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file.into_temp_path())
    }
}

#[async_trait]
impl Synthesizer for PiperSynthesizer {
    fn available(&self) -> bool {
        find_executable(&self.piper_bin).is_some()
    }

    async fn synthesize(&self, text: &str, voice: &VoiceEntry) -> Result<AudioArtifact> {
        let out_wav = self.scratch_wav()?;
        let started = Instant::now();

        let mut cmd = Command::new(&self.piper_bin);
        cmd.arg("--model")
            .arg(&voice.model_path)
            .arg("--config")
            .arg(&voice.config_path)
            .arg("--output_file")
            .arg(&*out_wav)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(target: "tts", command = ?cmd, "Running piper");
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MurmurError::SynthesisFailed(format!(
                    "engine executable {} not found",
                    self.piper_bin.display()
                ))
            } else {
                MurmurError::SynthesisFailed(format!("failed to start engine: {e}"))
            }
        })?;

        let outcome = timeout(self.timeout, drive_engine(&mut child, &engine_input(text))).await;
        let (status, stderr) = match outcome {
            Ok(result) => result
                .map_err(|e| MurmurError::SynthesisFailed(format!("engine I/O failed: {e}")))?,
            Err(_) => {
                warn!(
                    target: "tts",
                    voice = %voice.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Piper timed out; killing engine"
                );
                if let Err(e) = child.kill().await {
                    warn!(target: "tts", error = %e, "Failed to kill timed-out engine");
                }
                return Err(MurmurError::SynthesisTimeout(self.timeout));
            }
        };

        let diagnostics = diagnostic_text(&stderr);
        if !status.success() {
            return Err(MurmurError::SynthesisFailed(format!(
                "piper exited with {status}: {diagnostics}"
            )));
        }

        let bytes = match tokio::fs::read(&*out_wav).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Err(MurmurError::SynthesisFailed(format!(
                "engine produced no audio: {diagnostics}"
            )));
        }

        info!(
            target: "tts",
            voice = %voice.id,
            bytes = bytes.len(),
            synthesis_ms = started.elapsed().as_millis() as u64,
            "Synthesized speech"
        );
        Ok(AudioArtifact::new(voice.id.clone(), bytes))
    }
}

/// Piper treats every input line as a separate utterance; collapse the text
/// onto one line so a request produces a single clip.
fn engine_input(text: &str) -> String {
    let mut line = text
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    line.push('\n');
    line
}

/// Feed stdin, drain stderr, and wait for exit.
async fn drive_engine(child: &mut Child, input: &str) -> std::io::Result<(ExitStatus, Vec<u8>)> {
    let stdin = child.stdin.take();
    let stderr = child.stderr.take();

    let feed = async move {
        if let Some(mut stdin) = stdin {
            // An engine that exits early closes the pipe; its exit status
            // carries the real failure.
            match stdin.write_all(input.as_bytes()).await {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                other => other?,
            }
        }
        Ok::<_, std::io::Error>(())
    };
    let drain = async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            stderr.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };

    let ((), diagnostics) = tokio::try_join!(feed, drain)?;
    let status = child.wait().await?;
    Ok((status, diagnostics))
}
