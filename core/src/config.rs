//! Process configuration, read once at startup from the environment.
//!
//! Env overrides:
//! - MURMUR_HOST, MURMUR_PORT
//! - MURMUR_AUDIO_DIR, MURMUR_MODELS_DIR
//! - MURMUR_DEFAULT_VOICE, MURMUR_VOICES (comma separated)
//! - PIPER_BIN, PAPLAY_BIN, MURMUR_PLAYER
//! - PULSE_SERVER (routes playback through a PulseAudio server)
//! - TTS_TIMEOUT_MS, PLAYBACK_TIMEOUT_MS, AUDIO_CONNECT_TIMEOUT_MS

use crate::{MurmurError, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Where synthesized audio is played.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AudioBackendConfig {
    /// A PulseAudio server, e.g. `tcp:host.docker.internal:4713`.
    Pulse { server: String },
    /// Direct device access through a local player binary.
    Local { player: Option<String> },
}

impl AudioBackendConfig {
    pub fn describe(&self) -> String {
        match self {
            Self::Pulse { server } => format!("pulse({server})"),
            Self::Local { player: Some(p) } => format!("local({p})"),
            Self::Local { player: None } => "local(auto)".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MurmurConfig {
    pub host: String,
    pub port: u16,
    pub audio_dir: PathBuf,
    pub models_dir: PathBuf,
    pub default_voice: String,
    /// Voices enabled at startup; every one needs model files on disk.
    pub voices: Vec<String>,
    pub piper_bin: PathBuf,
    pub paplay_bin: PathBuf,
    pub audio_backend: AudioBackendConfig,
    pub synthesis_timeout: Duration,
    pub playback_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for MurmurConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            audio_dir: PathBuf::from("/app/audio"),
            models_dir: PathBuf::from("/app/models"),
            default_voice: "lessac".to_string(),
            voices: vec!["lessac".to_string()],
            piper_bin: PathBuf::from("piper"),
            paplay_bin: PathBuf::from("paplay"),
            audio_backend: AudioBackendConfig::Local { player: None },
            synthesis_timeout: Duration::from_millis(60_000),
            playback_timeout: Duration::from_millis(120_000),
            connect_timeout: Duration::from_millis(2_000),
        }
    }
}

impl MurmurConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let default_voice = get("MURMUR_DEFAULT_VOICE").unwrap_or(defaults.default_voice);
        let mut voices: Vec<String> = get("MURMUR_VOICES")
            .map(|list| {
                list.split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if !voices.contains(&default_voice) {
            voices.insert(0, default_voice.clone());
        }
        let mut seen = HashSet::new();
        voices.retain(|v| seen.insert(v.clone()));

        let audio_backend = match get("PULSE_SERVER") {
            Some(server) => AudioBackendConfig::Pulse { server },
            None => AudioBackendConfig::Local {
                player: get("MURMUR_PLAYER"),
            },
        };

        Ok(Self {
            host: get("MURMUR_HOST").unwrap_or(defaults.host),
            port: parse_or("MURMUR_PORT", get("MURMUR_PORT"), defaults.port)?,
            audio_dir: get("MURMUR_AUDIO_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.audio_dir),
            models_dir: get("MURMUR_MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.models_dir),
            default_voice,
            voices,
            piper_bin: get("PIPER_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.piper_bin),
            paplay_bin: get("PAPLAY_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.paplay_bin),
            audio_backend,
            synthesis_timeout: millis_or(
                "TTS_TIMEOUT_MS",
                get("TTS_TIMEOUT_MS"),
                defaults.synthesis_timeout,
            )?,
            playback_timeout: millis_or(
                "PLAYBACK_TIMEOUT_MS",
                get("PLAYBACK_TIMEOUT_MS"),
                defaults.playback_timeout,
            )?,
            connect_timeout: millis_or(
                "AUDIO_CONNECT_TIMEOUT_MS",
                get("AUDIO_CONNECT_TIMEOUT_MS"),
                defaults.connect_timeout,
            )?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|_| MurmurError::Config(format!("{key} has invalid value '{v}'"))),
    }
}

fn millis_or(key: &str, raw: Option<String>, default: Duration) -> Result<Duration> {
    let ms = parse_or(key, raw, default.as_millis() as u64)?;
    if ms == 0 {
        return Err(MurmurError::Config(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_millis(ms))
}
