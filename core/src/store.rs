//! Managed audio directory.
//!
//! The only place persisted artifacts are written to and the only place
//! playback reads from. Every requested name goes through
//! [`resolve_audio_path`] before the filesystem is touched.

use crate::{MurmurError, Result};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

pub const AUDIO_EXTENSION: &str = "wav";

/// Validate a client-supplied file name against `root`.
///
/// The name must be a single plain path component (no separators, no `.`
/// or `..`, not hidden). A missing `.wav` suffix is appended. Returns the
/// joined path, which is guaranteed to sit directly inside `root`.
pub fn resolve_audio_path(name: &str, root: &Path) -> Result<PathBuf> {
    let invalid = || MurmurError::InvalidFilename(name.to_string());

    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('.')
        || trimmed.contains(['/', '\\', '\0', ':'])
    {
        return Err(invalid());
    }

    let file_name = if has_audio_extension(trimmed) {
        trimmed.to_string()
    } else {
        format!("{trimmed}.{AUDIO_EXTENSION}")
    };

    let mut components = Path::new(&file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == file_name.as_str() => {}
        _ => return Err(invalid()),
    }

    let path = root.join(&file_name);
    if path.parent() != Some(root) {
        return Err(invalid());
    }
    Ok(path)
}

fn has_audio_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(AUDIO_EXTENSION))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Clone, Debug)]
pub struct AudioStore {
    root: PathBuf,
}

impl AudioStore {
    /// Open (and create if needed) the managed directory. Failure here is a
    /// startup error.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let unusable = |e: std::io::Error| {
            MurmurError::Config(format!("audio directory {} is unusable: {e}", root.display()))
        };
        tokio::fs::create_dir_all(&root).await.map_err(unusable)?;
        let canonical = tokio::fs::canonicalize(&root).await.map_err(unusable)?;
        // Probe readability up front rather than on the first /files call.
        drop(tokio::fs::read_dir(&canonical).await.map_err(unusable)?);
        info!(target: "audio", dir = ?canonical, "Managed audio directory ready");
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate `name` and make sure an existing entry does not escape the
    /// directory through a symlink.
    pub async fn resolve(&self, name: &str) -> Result<PathBuf> {
        let path = resolve_audio_path(name, &self.root)?;
        if tokio::fs::symlink_metadata(&path).await.is_ok() {
            let real = tokio::fs::canonicalize(&path)
                .await
                .map_err(|_| MurmurError::FileNotFound(file_name_of(&path)))?;
            if !real.starts_with(&self.root) {
                return Err(MurmurError::InvalidFilename(name.to_string()));
            }
        }
        Ok(path)
    }

    /// Persist `bytes` under `name`, replacing any existing file. The data is
    /// staged in a hidden temp file and renamed into place, so readers never
    /// see a partial artifact. Returns the stored file name.
    pub async fn save(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let path = resolve_audio_path(name, &self.root)?;
        let root = self.root.clone();
        let bytes = bytes.to_vec();
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut staged = tempfile::Builder::new()
                .prefix(".murmur-")
                .tempfile_in(&root)?;
            staged.write_all(&bytes)?;
            staged.as_file().sync_all()?;
            staged.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| MurmurError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let stored = file_name_of(&path);
        info!(target: "audio", file = %stored, "Saved audio artifact");
        Ok(stored)
    }

    /// Read a stored artifact, returning its normalized name and bytes.
    pub async fn read(&self, name: &str) -> Result<(String, Vec<u8>)> {
        let path = self.resolve(name).await?;
        let stored = file_name_of(&path);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(target: "audio", file = %stored, bytes = bytes.len(), "Read audio artifact");
                Ok((stored, bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MurmurError::FileNotFound(stored))
            }
            Err(e) if path.is_dir() => {
                debug!(target: "audio", error = %e, "Requested artifact is a directory");
                Err(MurmurError::FileNotFound(stored))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of the `.wav` files currently stored, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !has_audio_extension(&name) {
                continue;
            }
            if entry.file_type().await?.is_file() {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }
}
