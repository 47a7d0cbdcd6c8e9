// Murmur Core Library
// Local text-to-speech pipeline: voices, Piper synthesis, audio delivery

pub mod config;
pub mod service;
pub mod sink;
pub mod store;
pub mod synth;
pub mod voice;

mod utils;

// Export core types
pub use config::{AudioBackendConfig, MurmurConfig};
pub use service::{PlaybackRequest, SayOutcome, SpeechRequest, SpeechService, Stage};
pub use sink::{
    backend_from_config, AudioBackend, AudioSink, DeliveryReport, LocalPlayerBackend, PulseBackend,
};
pub use store::{resolve_audio_path, AudioStore};
pub use synth::{AudioArtifact, PiperSynthesizer, Synthesizer};
pub use voice::{CatalogVoice, VoiceEntry, VoiceInfo, VoiceRegistry, VOICE_CATALOG};

use std::time::Duration;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MurmurError {
    #[error("Unknown voice '{voice}'. Available: {}", available.join(", "))]
    UnknownVoice {
        voice: String,
        available: Vec<String>,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid filename '{0}'")]
    InvalidFilename(String),

    #[error("Audio file not found: {0}")]
    FileNotFound(String),

    #[error("Synthesis timed out after {}ms", .0.as_millis())]
    SynthesisTimeout(Duration),

    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Audio backend unreachable at {endpoint}: {reason}")]
    AudioBackendUnreachable { endpoint: String, reason: String },

    #[error("Audio playback failed: {0}")]
    PlaybackFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MurmurError {
    /// Stable machine-readable name reported to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownVoice { .. } => "UnknownVoice",
            Self::ValidationError(_) => "ValidationError",
            Self::InvalidFilename(_) => "InvalidFilename",
            Self::FileNotFound(_) => "FileNotFound",
            Self::SynthesisTimeout(_) => "SynthesisTimeout",
            Self::SynthesisFailed(_) => "SynthesisFailed",
            Self::AudioBackendUnreachable { .. } => "AudioBackendUnreachable",
            Self::PlaybackFailed(_) => "PlaybackFailed",
            Self::Config(_) => "ConfigError",
            Self::IoError(_) => "InternalError",
        }
    }

    /// True for errors caused by the request itself rather than the host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownVoice { .. }
                | Self::ValidationError(_)
                | Self::InvalidFilename(_)
                | Self::FileNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MurmurError>;
