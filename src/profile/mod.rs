//! Voice profiles: the mapping from a voice id to the backend that renders it.
//!
//! The store is pre-seeded with the cloud voice catalog (see [`builtin`]) and
//! persists user-created cloned voices as one JSON document each.

pub mod builtin;
pub mod classify;
mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BackendKind;

pub use classify::{PitchClassifier, VoiceClassifier};
pub use store::{CloneProfileRequest, MetadataUpdate, VoiceProfileStore};

/// `backend_params` key holding the cloud voice short name.
pub const PARAM_VOICE: &str = "voice";
/// `backend_params` key holding the reference recording of a cloned voice.
pub const PARAM_REFERENCE_AUDIO: &str = "reference_audio";
/// `backend_params` key holding free-form user notes.
pub const PARAM_NOTES: &str = "notes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Gender {
    Female,
    Male,
    #[default]
    Unknown,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gender::Female => "Female",
            Gender::Male => "Male",
            Gender::Unknown => "Unknown",
        })
    }
}

/// A named voice bound to exactly one backend kind.
///
/// Only the metadata (name, language, gender, notes) changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub voice_id: String,
    pub name: String,
    pub backend_kind: BackendKind,
    /// Primary language subtag (`"en"`, `"zh-cn"`), `None` when unknown.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub backend_params: BTreeMap<String, String>,
    #[serde(default)]
    pub builtin: bool,
    pub created_at: DateTime<Utc>,
}

impl VoiceProfile {
    /// Short name of the cloud voice to request, for cloud profiles.
    pub fn cloud_voice(&self) -> Option<&str> {
        self.backend_params.get(PARAM_VOICE).map(String::as_str)
    }

    /// Reference recording the cloning engines condition on.
    pub fn reference_audio(&self) -> Option<&Path> {
        self.backend_params
            .get(PARAM_REFERENCE_AUDIO)
            .filter(|p| !p.is_empty())
            .map(Path::new)
    }

    pub fn notes(&self) -> Option<&str> {
        self.backend_params.get(PARAM_NOTES).map(String::as_str)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProfileError {
    #[error("Voice '{0}' not found")]
    NotFound(String),
    #[error("Voice id '{0}' already exists")]
    DuplicateVoiceId(String),
    #[error("Built-in voice '{0}' cannot be changed")]
    BuiltinVoice(String),
    #[error("Invalid voice name '{0}'")]
    InvalidName(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Profile document error: {0}")]
    Json(#[from] serde_json::Error),
}
