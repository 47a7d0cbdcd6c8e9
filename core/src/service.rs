//! Speech service: the per-request pipeline
//! `Received -> VoiceResolved -> Synthesized -> Delivered -> Responded`,
//! with `Errored` reachable from any stage. Nothing is retried.

use crate::config::MurmurConfig;
use crate::sink::{backend_from_config, AudioSink};
use crate::store::{resolve_audio_path, AudioStore};
use crate::synth::{PiperSynthesizer, Synthesizer};
use crate::voice::VoiceRegistry;
use crate::{MurmurError, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: Option<String>,
    pub save_file: Option<String>,
    /// Defaults to playing the audio.
    pub play: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct PlaybackRequest {
    pub filename: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SayOutcome {
    pub voice: String,
    pub played: bool,
    pub saved_to: Option<String>,
    pub warnings: Vec<String>,
    pub duration_secs: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    VoiceResolved,
    Synthesized,
    Delivered,
    Responded,
    Errored,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::VoiceResolved => "voice_resolved",
            Stage::Synthesized => "synthesized",
            Stage::Delivered => "delivered",
            Stage::Responded => "responded",
            Stage::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Tracks one request through the pipeline for logging.
struct RequestTrace {
    id: u64,
    stage: Stage,
    started: Instant,
}

impl RequestTrace {
    fn new(id: u64) -> Self {
        debug!(target: "api", request = id, stage = %Stage::Received, "Request received");
        Self {
            id,
            stage: Stage::Received,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: Stage) {
        debug!(target: "api", request = self.id, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
    }

    fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                self.advance(Stage::Responded);
                info!(target: "api", request = self.id, elapsed_ms, "Request completed");
            }
            Err(e) => {
                let failed_at = self.stage;
                self.stage = Stage::Errored;
                if e.is_client_error() {
                    info!(target: "api", request = self.id, stage = %failed_at, kind = e.kind(), error = %e, "Request rejected");
                } else {
                    warn!(target: "api", request = self.id, stage = %failed_at, kind = e.kind(), error = %e, elapsed_ms, "Request failed");
                }
            }
        }
        result
    }
}

pub struct SpeechService {
    registry: Arc<VoiceRegistry>,
    synthesizer: Arc<dyn Synthesizer>,
    sink: AudioSink,
    next_id: AtomicU64,
}

impl SpeechService {
    pub fn new(
        registry: Arc<VoiceRegistry>,
        synthesizer: Arc<dyn Synthesizer>,
        sink: AudioSink,
    ) -> Self {
        Self {
            registry,
            synthesizer,
            sink,
            next_id: AtomicU64::new(1),
        }
    }

    /// Assemble the production pipeline. Any error here is fatal at startup:
    /// missing voice files or an unusable audio directory.
    pub async fn from_config(cfg: &MurmurConfig) -> Result<Self> {
        let registry = VoiceRegistry::load(&cfg.models_dir, &cfg.voices, &cfg.default_voice)?;
        let store = AudioStore::open(&cfg.audio_dir).await?;
        let synthesizer = PiperSynthesizer::from_config(cfg);
        let sink = AudioSink::new(backend_from_config(cfg), store);
        info!(
            target: "api",
            voices = ?registry.ids(),
            default_voice = %registry.default_voice(),
            audio_backend = %sink.backend_description(),
            "Speech service ready"
        );
        Ok(Self::new(Arc::new(registry), Arc::new(synthesizer), sink))
    }

    pub fn registry(&self) -> &VoiceRegistry {
        &self.registry
    }

    pub fn sink(&self) -> &AudioSink {
        &self.sink
    }

    pub fn engine_available(&self) -> bool {
        self.synthesizer.available()
    }

    fn trace(&self) -> RequestTrace {
        RequestTrace::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Synthesize `request.text` and deliver it. Input is fully validated
    /// before the engine runs; delivery problems are reported as warnings.
    pub async fn say(&self, request: SpeechRequest) -> Result<SayOutcome> {
        let mut trace = self.trace();
        let result = self.run_say(&mut trace, request).await;
        trace.finish(result)
    }

    async fn run_say(&self, trace: &mut RequestTrace, request: SpeechRequest) -> Result<SayOutcome> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(MurmurError::ValidationError(
                "text must not be empty".to_string(),
            ));
        }
        if let Some(name) = &request.save_file {
            resolve_audio_path(name, self.sink.store().root())?;
        }

        let voice = self.registry.resolve(request.voice.as_deref())?;
        trace.advance(Stage::VoiceResolved);
        debug!(target: "tts", voice = %voice.id, chars = text.chars().count(), "Synthesizing");

        let artifact = self.synthesizer.synthesize(text, voice).await?;
        trace.advance(Stage::Synthesized);

        let play = request.play.unwrap_or(true);
        let report = self
            .sink
            .deliver(&artifact, play, request.save_file.as_deref())
            .await;
        trace.advance(Stage::Delivered);

        Ok(SayOutcome {
            voice: artifact.voice.clone(),
            played: report.played,
            saved_to: report.saved_to,
            warnings: report.warnings,
            duration_secs: artifact.duration_secs(),
        })
    }

    /// Play a stored artifact. Returns its normalized file name.
    pub async fn play(&self, request: PlaybackRequest) -> Result<String> {
        let trace = self.trace();
        let result = self.sink.play_stored(&request.filename).await;
        trace.finish(result)
    }

    pub async fn list_files(&self) -> Result<Vec<String>> {
        self.sink.store().list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::AudioBackend;
    use crate::synth::{AudioArtifact, MockSynthesizer};
    use crate::voice::VoiceEntry;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        played: Mutex<usize>,
        down: bool,
    }

    #[async_trait]
    impl AudioBackend for FakeBackend {
        fn describe(&self) -> String {
            "fake".into()
        }

        async fn play(&self, _audio: &[u8]) -> Result<()> {
            if self.down {
                return Err(MurmurError::AudioBackendUnreachable {
                    endpoint: "host.docker.internal:4713".into(),
                    reason: "Connection refused".into(),
                });
            }
            *self.played.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn registry(dir: &Path) -> Arc<VoiceRegistry> {
        let entries = vec![
            VoiceEntry::in_dir(dir, "lessac"),
            VoiceEntry::in_dir(dir, "amy"),
        ];
        Arc::new(VoiceRegistry::from_entries(entries, "lessac").unwrap())
    }

    async fn service(
        dir: &Path,
        synth: MockSynthesizer,
        backend: Arc<FakeBackend>,
    ) -> SpeechService {
        let store = AudioStore::open(dir.join("audio")).await.unwrap();
        SpeechService::new(registry(dir), Arc::new(synth), AudioSink::new(backend, store))
    }

    fn say(text: &str) -> SpeechRequest {
        SpeechRequest {
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn say_uses_default_voice_and_plays() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = MockSynthesizer::new();
        synth
            .expect_synthesize()
            .withf(|text, voice| text == "Hello there" && voice.id == "lessac")
            .times(1)
            .returning(|_, voice| Ok(AudioArtifact::new(voice.id.clone(), b"RIFF".to_vec())));
        let backend = Arc::new(FakeBackend::default());
        let svc = service(dir.path(), synth, backend.clone()).await;

        let outcome = svc.say(say("  Hello there ")).await.unwrap();
        assert_eq!(outcome.voice, "lessac");
        assert!(outcome.played);
        assert!(outcome.saved_to.is_none());
        assert!(outcome.warnings.is_empty());
        assert_eq!(*backend.played.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn blank_text_never_reaches_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = MockSynthesizer::new();
        synth.expect_synthesize().times(0);
        let svc = service(dir.path(), synth, Arc::new(FakeBackend::default())).await;

        let err = svc.say(say(" \n\t ")).await.unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[tokio::test]
    async fn unknown_voice_never_reaches_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = MockSynthesizer::new();
        synth.expect_synthesize().times(0);
        let svc = service(dir.path(), synth, Arc::new(FakeBackend::default())).await;

        let err = svc
            .say(SpeechRequest {
                voice: Some("hal9000".into()),
                ..say("hello")
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UnknownVoice");
    }

    #[tokio::test]
    async fn traversal_in_save_file_is_rejected_before_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = MockSynthesizer::new();
        synth.expect_synthesize().times(0);
        let svc = service(dir.path(), synth, Arc::new(FakeBackend::default())).await;

        let err = svc
            .say(SpeechRequest {
                save_file: Some("../x.wav".into()),
                ..say("hello")
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidFilename");
        assert!(!dir.path().join("x.wav").exists());
    }

    #[tokio::test]
    async fn backend_down_still_saves_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = MockSynthesizer::new();
        synth
            .expect_synthesize()
            .returning(|_, voice| Ok(AudioArtifact::new(voice.id.clone(), b"RIFF".to_vec())));
        let backend = Arc::new(FakeBackend {
            down: true,
            ..Default::default()
        });
        let svc = service(dir.path(), synth, backend).await;

        let outcome = svc
            .say(SpeechRequest {
                voice: Some("amy".into()),
                save_file: Some("note".into()),
                ..say("remember this")
            })
            .await
            .unwrap();
        assert_eq!(outcome.voice, "amy");
        assert!(!outcome.played);
        assert_eq!(outcome.saved_to.as_deref(), Some("note.wav"));
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(svc.list_files().await.unwrap(), vec!["note.wav"]);
    }

    #[tokio::test]
    async fn play_false_skips_the_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = MockSynthesizer::new();
        synth
            .expect_synthesize()
            .returning(|_, voice| Ok(AudioArtifact::new(voice.id.clone(), b"RIFF".to_vec())));
        let backend = Arc::new(FakeBackend::default());
        let svc = service(dir.path(), synth, backend.clone()).await;

        let outcome = svc
            .say(SpeechRequest {
                play: Some(false),
                save_file: Some("quiet.wav".into()),
                ..say("shh")
            })
            .await
            .unwrap();
        assert!(!outcome.played);
        assert!(outcome.warnings.is_empty());
        assert_eq!(*backend.played.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn synthesis_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = MockSynthesizer::new();
        synth
            .expect_synthesize()
            .returning(|_, _| Err(MurmurError::SynthesisFailed("model load failed".into())));
        let svc = service(dir.path(), synth, Arc::new(FakeBackend::default())).await;

        let err = svc.say(say("hello")).await.unwrap_err();
        assert_eq!(err.kind(), "SynthesisFailed");
        assert!(svc.list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn play_reports_missing_files_and_backend_errors() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            down: true,
            ..Default::default()
        });
        let svc = service(dir.path(), MockSynthesizer::new(), backend).await;

        let err = svc
            .play(PlaybackRequest {
                filename: "missing.wav".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FileNotFound");

        svc.sink().store().save("here.wav", b"RIFF").await.unwrap();
        let err = svc
            .play(PlaybackRequest {
                filename: "here.wav".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AudioBackendUnreachable");
    }
}
