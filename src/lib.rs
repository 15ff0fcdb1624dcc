//! # tts-studio
//!
//! The synthesis core of a desktop text-to-speech studio: it routes a request to
//! a cloud neural voice service or to one of two locally hosted voice-cloning
//! engines, runs the generation off the interactive thread, then trims, shapes
//! and encodes the result for export.
//!
//! ## Features
//!
//! - **Capability-gated backends**: which engines may run is decided once at
//!   startup from compiled features, the engine runtime's version and its
//!   installed packages
//! - **Uniform adapters**: every backend returns audio at [`CANONICAL_SAMPLE_RATE`]
//! - **Per-request state machine** with cancellation and disclosed cloud fallback
//! - **Deterministic post-processing**: silence trim, tone/mood shaping, WAV/MP3 export
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! tts-studio = { version = "2026.10", features = ["cloud"] }
//! ```
//!
//! ```ignore
//! use tts_studio::{config::StudioConfig, studio::Studio, SynthesisRequest, Tone};
//!
//! let studio = Studio::start(StudioConfig::load("studio.toml")?).await?;
//! let request = SynthesisRequest::builder()
//!     .text("Hello, world!")
//!     .voice_id("en-US-AriaNeural")
//!     .tone(Tone::Upbeat)
//!     .output_path("hello.mp3")
//!     .output_format(tts_studio::AudioFormat::Mp3)
//!     .build()?;
//!
//! let outcome = studio.orchestrator().synthesize(request).await?;
//! println!("{:.2}s via {}", outcome.artifact.duration.as_secs_f64(), outcome.backend);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod capability;
pub mod config;
pub mod engines;
pub mod error;
pub mod orchestrator;
pub mod postprocess;
pub mod profile;
pub mod studio;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use audio::{AudioArtifact, AudioBuffer, AudioError, AudioFormat};
pub use capability::{BackendCapability, CapabilityMap};
pub use error::SynthesisError;
pub use orchestrator::{
    FallbackPolicy, Orchestrator, RequestHandle, RequestState, Substitution, SynthesisEvent,
    SynthesisOutcome, SynthesisRequest, SynthesisResult,
};
pub use postprocess::{Mood, PostProcessor, Tone};
pub use profile::{Gender, VoiceProfile, VoiceProfileStore};

/// Sample rate every backend adapter hands to the post-processor.
pub const CANONICAL_SAMPLE_RATE: u32 = 24_000;

/// The family of synthesis engine a voice profile is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Cloud neural voices (built-in catalog, no cloning).
    CloudNeural,
    /// Zero-shot cloning engine trained on English only.
    CloneEnglish,
    /// Zero-shot cross-lingual cloning engine.
    CloneMultilingual,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::CloudNeural,
        BackendKind::CloneEnglish,
        BackendKind::CloneMultilingual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::CloudNeural => "cloud-neural",
            BackendKind::CloneEnglish => "clone-english",
            BackendKind::CloneMultilingual => "clone-multilingual",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
