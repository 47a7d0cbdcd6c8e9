//! Request and response bodies for the HTTP API.

use murmur_core::{CatalogVoice, PlaybackRequest, SayOutcome, SpeechRequest, VoiceEntry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SayRequest {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub save_file: Option<String>,
    #[serde(default)]
    pub play: Option<bool>,
}

impl From<SayRequest> for SpeechRequest {
    fn from(req: SayRequest) -> Self {
        SpeechRequest {
            text: req.text,
            voice: req.voice,
            save_file: req.save_file,
            play: req.play,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SayResponse {
    pub synthesized: bool,
    pub played: bool,
    pub saved_to: Option<String>,
    pub warnings: Vec<String>,
    pub voice: String,
    pub duration_secs: Option<f64>,
}

impl From<SayOutcome> for SayResponse {
    fn from(outcome: SayOutcome) -> Self {
        SayResponse {
            synthesized: true,
            played: outcome.played,
            saved_to: outcome.saved_to,
            warnings: outcome.warnings,
            voice: outcome.voice,
            duration_secs: outcome.duration_secs,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    pub filename: String,
}

impl From<PlayRequest> for PlaybackRequest {
    fn from(req: PlayRequest) -> Self {
        PlaybackRequest {
            filename: req.filename,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlayResponse {
    pub played: bool,
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub files: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub audio_backend: String,
    pub engine_available: bool,
    pub player_available: bool,
    pub voices: Vec<String>,
    pub default_voice: String,
    pub audio_dir: String,
}

#[derive(Debug, Deserialize)]
pub struct VoicesQuery {
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VoicesResponse {
    pub voices: Vec<VoiceEntry>,
    pub catalog: Vec<CatalogVoice>,
    pub default: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_kind: String,
    pub message: String,
}
