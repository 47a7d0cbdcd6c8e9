//! Voice registry: the immutable set of Piper voices enabled at startup.
//!
//! Each enabled voice `<id>` is backed by `<models_dir>/<id>.onnx` and its
//! Piper config `<models_dir>/<id>.onnx.json`. Missing files abort startup;
//! a request for a voice that is not registered is an `UnknownVoice` error.

use crate::{MurmurError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Catalog metadata for a voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct VoiceInfo {
    pub description: &'static str,
    pub language: &'static str,
    pub gender: &'static str,
}

const fn voice_info(description: &'static str, language: &'static str, gender: &'static str) -> VoiceInfo {
    VoiceInfo {
        description,
        language,
        gender,
    }
}

/// Known Piper voices and their metadata.
pub const VOICE_CATALOG: &[(&str, VoiceInfo)] = &[
    ("lessac", voice_info("US English, neutral", "en", "neutral")),
    ("amy", voice_info("US English, female", "en", "female")),
    ("joe", voice_info("US English, male", "en", "male")),
    ("alan", voice_info("British English, male", "en", "male")),
    ("alba", voice_info("Scottish English, female", "en", "female")),
    ("thorsten", voice_info("German, male", "de", "male")),
    ("karlsson", voice_info("German, male", "de", "male")),
    ("kerstin", voice_info("German, female", "de", "female")),
];

const CUSTOM_VOICE: VoiceInfo = voice_info("Custom voice", "unknown", "unknown");

impl VoiceInfo {
    pub fn lookup(id: &str) -> VoiceInfo {
        VOICE_CATALOG
            .iter()
            .find(|(name, _)| *name == id)
            .map(|(_, info)| *info)
            .unwrap_or(CUSTOM_VOICE)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct VoiceEntry {
    pub id: String,
    #[serde(skip)]
    pub model_path: PathBuf,
    #[serde(skip)]
    pub config_path: PathBuf,
    #[serde(flatten)]
    pub info: VoiceInfo,
}

impl VoiceEntry {
    /// Entry for `id` following the `<dir>/<id>.onnx` layout. Does not touch
    /// the filesystem.
    pub fn in_dir(models_dir: &Path, id: &str) -> Self {
        Self {
            id: id.to_string(),
            model_path: models_dir.join(format!("{id}.onnx")),
            config_path: models_dir.join(format!("{id}.onnx.json")),
            info: VoiceInfo::lookup(id),
        }
    }
}

/// A catalog voice and whether it is enabled in this deployment.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CatalogVoice {
    pub id: &'static str,
    #[serde(flatten)]
    pub info: VoiceInfo,
    pub installed: bool,
}

#[derive(Debug)]
pub struct VoiceRegistry {
    voices: Vec<VoiceEntry>,
    default_voice: String,
}

impl VoiceRegistry {
    /// Load the enabled voices from `models_dir`, failing if any backing
    /// file is missing.
    pub fn load(models_dir: &Path, ids: &[String], default_voice: &str) -> Result<Self> {
        let mut voices = Vec::with_capacity(ids.len());
        for id in ids {
            if !is_valid_voice_id(id) {
                return Err(MurmurError::Config(format!("invalid voice identifier '{id}'")));
            }
            let entry = VoiceEntry::in_dir(models_dir, id);
            for path in [&entry.model_path, &entry.config_path] {
                if !path.is_file() {
                    return Err(MurmurError::Config(format!(
                        "voice '{}' is missing {}",
                        id,
                        path.display()
                    )));
                }
            }
            info!(target: "tts", voice = %id, model = ?entry.model_path, "Registered voice");
            voices.push(entry);
        }
        Self::from_entries(voices, default_voice)
    }

    /// Build a registry from already-resolved entries.
    pub fn from_entries(voices: Vec<VoiceEntry>, default_voice: &str) -> Result<Self> {
        if !voices.iter().any(|v| v.id == default_voice) {
            return Err(MurmurError::Config(format!(
                "default voice '{default_voice}' is not among the enabled voices"
            )));
        }
        Ok(Self {
            voices,
            default_voice: default_voice.to_string(),
        })
    }

    /// Resolve a requested voice; `None` or a blank name means the default.
    pub fn resolve(&self, requested: Option<&str>) -> Result<&VoiceEntry> {
        let id = requested
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.default_voice);
        self.voices
            .iter()
            .find(|v| v.id == id)
            .ok_or_else(|| MurmurError::UnknownVoice {
                voice: id.to_string(),
                available: self.ids(),
            })
    }

    pub fn list(&self, language: Option<&str>) -> Vec<&VoiceEntry> {
        self.voices
            .iter()
            .filter(|v| language.map_or(true, |lang| v.info.language.eq_ignore_ascii_case(lang)))
            .collect()
    }

    /// The full catalog, flagging the voices this registry serves.
    pub fn catalog(&self, language: Option<&str>) -> Vec<CatalogVoice> {
        VOICE_CATALOG
            .iter()
            .filter(|(_, info)| language.map_or(true, |lang| info.language.eq_ignore_ascii_case(lang)))
            .map(|&(id, info)| CatalogVoice {
                id,
                info,
                installed: self.voices.iter().any(|v| v.id == id),
            })
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.voices.iter().map(|v| v.id.clone()).collect()
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }
}

fn is_valid_voice_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !id.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch_voice(dir: &Path, id: &str) {
        std::fs::write(dir.join(format!("{id}.onnx")), b"model").unwrap();
        std::fs::write(dir.join(format!("{id}.onnx.json")), b"{}").unwrap();
    }

    #[test]
    fn load_registers_voices_with_catalog_metadata() {
        let dir = tempfile::tempdir().unwrap();
        touch_voice(dir.path(), "lessac");
        touch_voice(dir.path(), "thorsten");
        touch_voice(dir.path(), "my-voice");

        let ids = vec!["lessac".into(), "thorsten".into(), "my-voice".into()];
        let registry = VoiceRegistry::load(dir.path(), &ids, "lessac").unwrap();

        let thorsten = registry.resolve(Some("thorsten")).unwrap();
        assert_eq!(thorsten.info.language, "de");
        assert_eq!(thorsten.model_path, dir.path().join("thorsten.onnx"));
        assert_eq!(registry.resolve(Some("my-voice")).unwrap().info, CUSTOM_VOICE);
    }

    #[test]
    fn missing_model_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        touch_voice(dir.path(), "lessac");
        std::fs::write(dir.path().join("amy.onnx"), b"model").unwrap();

        let ids = vec!["lessac".into(), "amy".into()];
        let err = VoiceRegistry::load(dir.path(), &ids, "lessac").unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
        assert!(err.to_string().contains("amy.onnx.json"));
    }

    #[test]
    fn default_voice_must_be_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![VoiceEntry::in_dir(dir.path(), "amy")];
        assert!(VoiceRegistry::from_entries(entries, "lessac").is_err());
    }

    #[test]
    fn path_like_voice_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ids = vec!["../lessac".into()];
        assert!(VoiceRegistry::load(dir.path(), &ids, "../lessac").is_err());
    }

    #[test]
    fn resolve_defaults_and_rejects_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            VoiceEntry::in_dir(dir.path(), "lessac"),
            VoiceEntry::in_dir(dir.path(), "kerstin"),
        ];
        let registry = VoiceRegistry::from_entries(entries, "lessac").unwrap();

        assert_eq!(registry.resolve(None).unwrap().id, "lessac");
        assert_eq!(registry.resolve(Some("  ")).unwrap().id, "lessac");

        match registry.resolve(Some("hal9000")) {
            Err(MurmurError::UnknownVoice { voice, available }) => {
                assert_eq!(voice, "hal9000");
                assert_eq!(available, vec!["lessac", "kerstin"]);
            }
            other => panic!("expected UnknownVoice, got {other:?}"),
        }
    }

    #[test]
    fn list_filters_by_language() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            VoiceEntry::in_dir(dir.path(), "lessac"),
            VoiceEntry::in_dir(dir.path(), "kerstin"),
            VoiceEntry::in_dir(dir.path(), "thorsten"),
        ];
        let registry = VoiceRegistry::from_entries(entries, "lessac").unwrap();

        let german: Vec<_> = registry.list(Some("DE")).iter().map(|v| v.id.as_str()).collect();
        assert_eq!(german, vec!["kerstin", "thorsten"]);
        assert_eq!(registry.list(None).len(), 3);
    }

    #[test]
    fn catalog_flags_installed_voices() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            VoiceEntry::in_dir(dir.path(), "lessac"),
            VoiceEntry::in_dir(dir.path(), "kerstin"),
        ];
        let registry = VoiceRegistry::from_entries(entries, "lessac").unwrap();

        let all = registry.catalog(None);
        assert_eq!(all.len(), VOICE_CATALOG.len());
        let installed: Vec<_> = all.iter().filter(|v| v.installed).map(|v| v.id).collect();
        assert_eq!(installed, vec!["lessac", "kerstin"]);

        let german = registry.catalog(Some("de"));
        assert_eq!(german.len(), 3);
        assert!(german.iter().any(|v| v.id == "thorsten" && !v.installed));
    }
}
