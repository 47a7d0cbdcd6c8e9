//! Audio sink: playback through a pluggable backend plus persistence into
//! the managed directory.
//!
//! Backends:
//! - `PulseBackend`: `paplay` against a PulseAudio server (typically the
//!   host's, over TCP, when running without direct device access)
//! - `LocalPlayerBackend`: a local player binary (aplay|paplay|ffplay)

use crate::config::{AudioBackendConfig, MurmurConfig};
use crate::store::AudioStore;
use crate::synth::AudioArtifact;
use crate::utils::{diagnostic_text, find_executable, find_executable_in};
use crate::{MurmurError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const DEFAULT_PULSE_PORT: u16 = 4713;
const LOCAL_PLAYERS: [&str; 3] = ["aplay", "paplay", "ffplay"];

/// Something that can emit WAV audio.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Human-readable endpoint description for logs and service info.
    fn describe(&self) -> String;

    /// Whether the player this backend drives can be found.
    fn available(&self) -> bool {
        true
    }

    async fn play(&self, audio: &[u8]) -> Result<()>;
}

/// Build the backend selected by the configuration.
pub fn backend_from_config(cfg: &MurmurConfig) -> Arc<dyn AudioBackend> {
    match &cfg.audio_backend {
        AudioBackendConfig::Pulse { server } => Arc::new(PulseBackend::new(
            server.clone(),
            cfg.paplay_bin.clone(),
            cfg.connect_timeout,
            cfg.playback_timeout,
        )),
        AudioBackendConfig::Local { player } => Arc::new(LocalPlayerBackend::new(
            player.clone(),
            cfg.playback_timeout,
        )),
    }
}

/// Extract a `host:port` to probe from a PulseAudio server string.
///
/// Accepts the forms PulseAudio understands (`tcp:host:port`,
/// `tcp6:[::1]:4713`, `{machine-id}tcp:host`, bare `host`). Returns `None`
/// for unix-socket servers, which have nothing to probe over TCP.
pub fn pulse_tcp_endpoint(server: &str) -> Option<String> {
    // A server list is tried in order; probe the first entry.
    let first = server.split_whitespace().next()?;
    let entry = match first.strip_prefix('{') {
        Some(rest) => rest.split_once('}').map(|(_, e)| e)?,
        None => first,
    };
    if entry.starts_with("unix:") || entry.starts_with('/') {
        return None;
    }
    let addr = ["tcp4:", "tcp6:", "tcp:"]
        .iter()
        .find_map(|p| entry.strip_prefix(p))
        .unwrap_or(entry);
    if addr.is_empty() {
        return None;
    }

    let has_port = if addr.starts_with('[') {
        addr.contains("]:")
    } else {
        addr.contains(':')
    };
    if has_port {
        Some(addr.to_string())
    } else {
        Some(format!("{addr}:{DEFAULT_PULSE_PORT}"))
    }
}

/// Connect (and immediately drop) to check the audio server is listening.
pub async fn probe_endpoint(endpoint: &str, connect_timeout: Duration) -> Result<()> {
    let unreachable = |reason: String| MurmurError::AudioBackendUnreachable {
        endpoint: endpoint.to_string(),
        reason,
    };
    match timeout(connect_timeout, TcpStream::connect(endpoint)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(unreachable(e.to_string())),
        Err(_) => Err(unreachable(format!(
            "no connection within {}ms",
            connect_timeout.as_millis()
        ))),
    }
}

pub struct PulseBackend {
    server: String,
    paplay_bin: PathBuf,
    connect_timeout: Duration,
    playback_timeout: Duration,
}

impl PulseBackend {
    pub fn new(
        server: impl Into<String>,
        paplay_bin: impl Into<PathBuf>,
        connect_timeout: Duration,
        playback_timeout: Duration,
    ) -> Self {
        Self {
            server: server.into(),
            paplay_bin: paplay_bin.into(),
            connect_timeout,
            playback_timeout,
        }
    }
}

#[async_trait]
impl AudioBackend for PulseBackend {
    fn describe(&self) -> String {
        format!("pulse({})", self.server)
    }

    fn available(&self) -> bool {
        find_executable(&self.paplay_bin).is_some()
    }

    async fn play(&self, audio: &[u8]) -> Result<()> {
        if let Some(endpoint) = pulse_tcp_endpoint(&self.server) {
            probe_endpoint(&endpoint, self.connect_timeout).await?;
        }

        let wav = stage_wav(audio).await?;
        let mut cmd = Command::new(&self.paplay_bin);
        cmd.arg(&*wav).env("PULSE_SERVER", &self.server);
        debug!(target: "audio", command = ?cmd, pulse_server = %self.server, "Playing via PulseAudio");

        match run_player(cmd, self.playback_timeout).await {
            Err(PlayerError::Failed(diag)) if is_connection_failure(&diag) => {
                Err(MurmurError::AudioBackendUnreachable {
                    endpoint: self.server.clone(),
                    reason: format!(
                        "{diag}. Ensure PulseAudio accepts TCP connections on the host"
                    ),
                })
            }
            other => other.map_err(|e| e.into_murmur(&self.paplay_bin)),
        }
    }
}

pub struct LocalPlayerBackend {
    player: Option<String>,
    playback_timeout: Duration,
    search_dirs: Option<Vec<PathBuf>>,
}

impl LocalPlayerBackend {
    pub fn new(player: Option<String>, playback_timeout: Duration) -> Self {
        Self {
            player,
            playback_timeout,
            search_dirs: None,
        }
    }

    /// Look players up in `dirs` instead of `PATH`.
    pub fn with_search_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_dirs = Some(dirs);
        self
    }

    fn locate(&self, bin: &Path) -> Option<PathBuf> {
        match &self.search_dirs {
            Some(dirs) => find_executable_in(bin, dirs),
            None => find_executable(bin),
        }
    }

    /// The configured player if it exists, else the first of
    /// aplay, paplay and ffplay that does.
    pub fn select_player(&self) -> Option<PathBuf> {
        if let Some(preferred) = &self.player {
            if let Some(bin) = self.locate(Path::new(preferred)) {
                return Some(bin);
            }
            warn!(target: "audio", player = %preferred, "Configured player not found; trying defaults");
        }
        LOCAL_PLAYERS
            .iter()
            .find_map(|name| self.locate(Path::new(name)))
    }
}

#[async_trait]
impl AudioBackend for LocalPlayerBackend {
    fn describe(&self) -> String {
        match &self.player {
            Some(p) => format!("local({p})"),
            None => "local(auto)".to_string(),
        }
    }

    fn available(&self) -> bool {
        self.select_player().is_some()
    }

    async fn play(&self, audio: &[u8]) -> Result<()> {
        let player = self
            .select_player()
            .ok_or_else(|| MurmurError::AudioBackendUnreachable {
                endpoint: "local audio device".to_string(),
                reason: format!("no audio player found (tried {})", LOCAL_PLAYERS.join(", ")),
            })?;

        let wav = stage_wav(audio).await?;
        let mut cmd = Command::new(&player);
        if player.file_stem().and_then(|s| s.to_str()) == Some("ffplay") {
            cmd.args(["-autoexit", "-nodisp", "-loglevel", "error"]);
        }
        cmd.arg(&*wav);
        debug!(target: "audio", command = ?cmd, "Playing via local player");

        run_player(cmd, self.playback_timeout)
            .await
            .map_err(|e| e.into_murmur(&player))
    }
}

/// Write audio to a scratch WAV file that is removed on drop.
async fn stage_wav(audio: &[u8]) -> Result<tempfile::TempPath> {
    let path = tempfile::Builder::new()
        .prefix("murmur-play-")
        .suffix(".wav")
        .tempfile()?
        .into_temp_path();
    tokio::fs::write(&*path, audio).await?;
    Ok(path)
}

enum PlayerError {
    Io(std::io::Error),
    Failed(String),
    TimedOut(Duration),
}

impl PlayerError {
    fn into_murmur(self, bin: &Path) -> MurmurError {
        match self {
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                MurmurError::PlaybackFailed(format!("{} not found", bin.display()))
            }
            Self::Io(e) => MurmurError::PlaybackFailed(format!("{}: {e}", bin.display())),
            Self::Failed(diag) => MurmurError::PlaybackFailed(diag),
            Self::TimedOut(limit) => MurmurError::PlaybackFailed(format!(
                "playback did not finish within {}ms",
                limit.as_millis()
            )),
        }
    }
}

async fn run_player(mut cmd: Command, limit: Duration) -> std::result::Result<(), PlayerError> {
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(PlayerError::Io)?;

    // Dropping the wait future on timeout kills the player.
    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(PlayerError::Io)?,
        Err(_) => return Err(PlayerError::TimedOut(limit)),
    };
    if output.status.success() {
        info!(target: "audio", "Playback finished");
        Ok(())
    } else {
        let diag = diagnostic_text(&output.stderr);
        Err(PlayerError::Failed(format!(
            "player exited with {}: {diag}",
            output.status
        )))
    }
}

fn is_connection_failure(diagnostics: &str) -> bool {
    let lower = diagnostics.to_ascii_lowercase();
    ["connection refused", "connection failure", "connection terminated", "timeout"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Outcome of delivering one artifact; playback and persistence are
/// reported independently.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeliveryReport {
    pub played: bool,
    pub saved_to: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct AudioSink {
    backend: Arc<dyn AudioBackend>,
    store: AudioStore,
}

impl AudioSink {
    pub fn new(backend: Arc<dyn AudioBackend>, store: AudioStore) -> Self {
        Self { backend, store }
    }

    pub fn store(&self) -> &AudioStore {
        &self.store
    }

    pub fn backend_description(&self) -> String {
        self.backend.describe()
    }

    pub fn player_available(&self) -> bool {
        self.backend.available()
    }

    /// Play and/or persist an artifact. Neither path can fail the delivery
    /// as a whole; failures become warnings.
    pub async fn deliver(
        &self,
        artifact: &AudioArtifact,
        play: bool,
        save_as: Option<&str>,
    ) -> DeliveryReport {
        let playback = async {
            if play {
                Some(self.backend.play(&artifact.bytes).await)
            } else {
                None
            }
        };
        let persist = async {
            match save_as {
                Some(name) => Some(self.store.save(name, &artifact.bytes).await),
                None => None,
            }
        };
        let (played, saved) = tokio::join!(playback, persist);

        let mut report = DeliveryReport::default();
        match played {
            Some(Ok(())) => report.played = true,
            Some(Err(e)) => {
                warn!(target: "audio", kind = e.kind(), error = %e, "Playback failed");
                report.warnings.push(format!("playback skipped: {e}"));
            }
            None => {}
        }
        match saved {
            Some(Ok(stored)) => report.saved_to = Some(stored),
            Some(Err(e)) => {
                warn!(target: "audio", kind = e.kind(), error = %e, "Saving artifact failed");
                report.warnings.push(format!("audio not saved: {e}"));
            }
            None => {}
        }
        report
    }

    /// Play a previously stored artifact. Unlike `deliver`, failures are
    /// returned to the caller. Returns the stored file name.
    pub async fn play_stored(&self, name: &str) -> Result<String> {
        let (stored, bytes) = self.store.read(name).await?;
        self.backend.play(&bytes).await?;
        info!(target: "audio", file = %stored, "Played stored artifact");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        played: Mutex<Vec<Vec<u8>>>,
        unreachable: bool,
    }

    #[async_trait]
    impl AudioBackend for RecordingBackend {
        fn describe(&self) -> String {
            "recording".into()
        }

        async fn play(&self, audio: &[u8]) -> Result<()> {
            if self.unreachable {
                return Err(MurmurError::AudioBackendUnreachable {
                    endpoint: "host.docker.internal:4713".into(),
                    reason: "Connection refused".into(),
                });
            }
            self.played.lock().unwrap().push(audio.to_vec());
            Ok(())
        }
    }

    #[test]
    fn pulse_server_strings_map_to_tcp_endpoints() {
        assert_eq!(
            pulse_tcp_endpoint("tcp:host.docker.internal:4713").as_deref(),
            Some("host.docker.internal:4713")
        );
        assert_eq!(pulse_tcp_endpoint("tcp:10.0.0.2").as_deref(), Some("10.0.0.2:4713"));
        assert_eq!(pulse_tcp_endpoint("tcp6:[::1]").as_deref(), Some("[::1]:4713"));
        assert_eq!(pulse_tcp_endpoint("tcp6:[::1]:4800").as_deref(), Some("[::1]:4800"));
        assert_eq!(
            pulse_tcp_endpoint("{abc123}tcp:audio-host:4713 unix:/run/pulse/native").as_deref(),
            Some("audio-host:4713")
        );
        assert_eq!(pulse_tcp_endpoint("audiobox").as_deref(), Some("audiobox:4713"));
        assert_eq!(pulse_tcp_endpoint("unix:/run/user/1000/pulse/native"), None);
        assert_eq!(pulse_tcp_endpoint("/run/pulse/native"), None);
        assert_eq!(pulse_tcp_endpoint(""), None);
    }

    #[tokio::test]
    async fn probe_reports_closed_port_as_unreachable() {
        // Bind then drop to get a port nobody is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = probe_endpoint(&addr, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AudioBackendUnreachable");
    }

    #[tokio::test]
    async fn probe_accepts_listening_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        probe_endpoint(&addr, Duration::from_millis(500)).await.unwrap();
    }

    #[tokio::test]
    async fn pulse_backend_fails_fast_when_server_is_down() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = PulseBackend::new(
            format!("tcp:{addr}"),
            "/nonexistent/paplay",
            Duration::from_millis(500),
            Duration::from_secs(5),
        );
        let err = backend.play(b"RIFF").await.unwrap_err();
        assert_eq!(err.kind(), "AudioBackendUnreachable");
    }

    #[test]
    fn connection_errors_are_recognized() {
        assert!(is_connection_failure("Connection failure: Connection refused"));
        assert!(!is_connection_failure("Failed to open audio file."));
    }

    #[tokio::test]
    async fn deliver_reports_play_and_save_independently() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::open(dir.path()).await.unwrap();
        let backend = Arc::new(RecordingBackend {
            unreachable: true,
            ..Default::default()
        });
        let sink = AudioSink::new(backend, store);

        let artifact = AudioArtifact::new("lessac", b"RIFF....WAVE".to_vec());
        let report = sink.deliver(&artifact, true, Some("kept.wav")).await;

        assert!(!report.played);
        assert_eq!(report.saved_to.as_deref(), Some("kept.wav"));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("unreachable"));
        assert_eq!(std::fs::read(dir.path().join("kept.wav")).unwrap(), b"RIFF....WAVE");
    }

    #[tokio::test]
    async fn save_failure_becomes_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::open(dir.path()).await.unwrap();
        // A directory in the way makes the final rename fail.
        std::fs::create_dir(dir.path().join("taken.wav")).unwrap();
        std::fs::write(dir.path().join("taken.wav").join("inner"), b"x").unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let sink = AudioSink::new(backend.clone(), store);

        let artifact = AudioArtifact::new("lessac", b"RIFF".to_vec());
        let report = sink.deliver(&artifact, true, Some("taken")).await;

        assert!(report.played);
        assert_eq!(report.saved_to, None);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("audio not saved"));
        assert_eq!(backend.played.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deliver_without_play_or_save_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::open(dir.path()).await.unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let sink = AudioSink::new(backend.clone(), store);

        let artifact = AudioArtifact::new("lessac", b"RIFF".to_vec());
        let report = sink.deliver(&artifact, false, None).await;
        assert_eq!(report, DeliveryReport::default());
        assert!(backend.played.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn play_stored_streams_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::open(dir.path()).await.unwrap();
        store.save("hello.wav", b"stored audio").await.unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let sink = AudioSink::new(backend.clone(), store);

        assert_eq!(sink.play_stored("hello").await.unwrap(), "hello.wav");
        assert_eq!(backend.played.lock().unwrap()[0], b"stored audio");

        let err = sink.play_stored("../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), "InvalidFilename");
    }
}
