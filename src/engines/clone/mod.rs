//! Zero-shot voice cloning backends.
//!
//! Two engines are supported, both hosted in a separate engine runtime and
//! driven through a [`CloneRuntime`]:
//!
//! | Variant | Engine | Languages | Runtime | First-use download |
//! |---|---|---|---|---|
//! | [`CloneVariant::English`] | Chatterbox | English only | 3.10 - 3.11 | ~400 MB |
//! | [`CloneVariant::Multilingual`] | XTTS v2 | 16 languages | 3.9 - 3.11 | ~2 GB |
//!
//! The engine is loaded lazily on the first request (reported as
//! [`GenerationPhase::WarmingUp`](crate::engines::GenerationPhase::WarmingUp))
//! and kept until its worker fails. Speaker conditioning is computed
//! once per reference recording, keyed by a content [`Fingerprint`].

mod engine;
mod model;
pub mod sidecar;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::audio::AudioBuffer;
use crate::engines::BackendError;
use crate::BackendKind;

pub use engine::CloneBackend;
pub use model::{map_multilingual_language, Fingerprint, MULTILINGUAL_LANGUAGES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloneVariant {
    English,
    Multilingual,
}

impl CloneVariant {
    pub fn kind(self) -> BackendKind {
        match self {
            CloneVariant::English => BackendKind::CloneEnglish,
            CloneVariant::Multilingual => BackendKind::CloneMultilingual,
        }
    }

    /// Name the engine worker knows the model by.
    pub fn engine_name(self) -> &'static str {
        match self {
            CloneVariant::English => "chatterbox",
            CloneVariant::Multilingual => "xtts_v2",
        }
    }

    /// Package that must be importable in the engine runtime.
    pub fn package(self) -> &'static str {
        match self {
            CloneVariant::English => "chatterbox",
            CloneVariant::Multilingual => "TTS",
        }
    }

    /// Language code to pass to the engine for a profile/text language.
    ///
    /// The English engine takes none; the multilingual engine gets a code
    /// from [`MULTILINGUAL_LANGUAGES`].
    pub fn engine_language(self, language: Option<&str>) -> Option<String> {
        match self {
            CloneVariant::English => None,
            CloneVariant::Multilingual => Some(map_multilingual_language(language).to_string()),
        }
    }
}

impl fmt::Display for CloneVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.engine_name())
    }
}

/// Parameters for a cloning backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneParams {
    /// Longest accepted input, in characters.
    pub max_text_chars: usize,
}

impl CloneParams {
    pub fn for_variant(variant: CloneVariant) -> Self {
        let max_text_chars = match variant {
            CloneVariant::English => 1000,
            CloneVariant::Multilingual => 600,
        };
        Self { max_text_chars }
    }
}

/// Engine-side conditioning state for one speaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpeakerHandle(pub String);

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CloneError {
    #[error("engine failed to load: {0}")]
    Load(String),
    #[error("engine worker: {0}")]
    Worker(String),
    #[error("speaker preparation failed: {0}")]
    Speaker(String),
    #[error("generation failed: {0}")]
    Generation(String),
}

impl From<CloneError> for BackendError {
    fn from(err: CloneError) -> Self {
        match err {
            CloneError::Load(reason) => BackendError::Unavailable(reason),
            other => BackendError::Engine(other.to_string()),
        }
    }
}

/// A loaded cloning engine.
#[async_trait]
pub trait CloneSession: Send + Sync {
    /// Whether `generate` may run concurrently with itself.
    fn reentrant(&self) -> bool;

    async fn prepare_speaker(&self, reference_audio: &Path) -> Result<SpeakerHandle, CloneError>;

    async fn generate(
        &self,
        text: &str,
        speaker: &SpeakerHandle,
        language: Option<&str>,
    ) -> Result<AudioBuffer, CloneError>;
}

/// Loads cloning engines. Loading is slow; a backend loads again only
/// after a worker failure.
#[async_trait]
pub trait CloneRuntime: Send + Sync {
    async fn load(&self, variant: CloneVariant) -> Result<Box<dyn CloneSession>, CloneError>;
}
