//! Deterministic audio post-processing.
//!
//! Every generated buffer goes through the same fixed pipeline:
//!
//! | Stage | What happens |
//! |---|---|
//! | [`PostStage::Trim`] | leading/trailing silence removed (RMS threshold, padded) |
//! | [`PostStage::ToneMood`] | tone preset speed and gain, scaled by mood |
//! | [`PostStage::Normalize`] | downmix to mono, resample to the export rate |
//! | [`PostStage::Encode`] | 16-bit WAV or 192 kbps MP3 |
//!
//! Each stage is a pure function of its input and the configuration, so the
//! same buffer always yields the same artifact. None of the stages lengthen
//! the audio.

pub mod encode;
pub mod tone;
pub mod trim;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::audio::{AudioArtifact, AudioBuffer, AudioFormat};
use crate::error::SynthesisError;

pub use tone::{InvalidMood, Mood, Shaping, Tone};
pub use trim::TrimSettings;

/// Sample rate of exported files.
pub const EXPORT_SAMPLE_RATE: u32 = 44_100;

/// Pipeline step a post-processing failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostStage {
    Trim,
    ToneMood,
    Normalize,
    Encode,
    /// Writing the artifact to the requested path.
    Write,
}

impl fmt::Display for PostStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PostStage::Trim => "trim",
            PostStage::ToneMood => "tone/mood",
            PostStage::Normalize => "normalize",
            PostStage::Encode => "encode",
            PostStage::Write => "write",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub trim: TrimSettings,
    pub export_sample_rate: u32,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            trim: TrimSettings::default(),
            export_sample_rate: EXPORT_SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    config: PostProcessConfig,
}

impl PostProcessor {
    pub fn new(config: PostProcessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PostProcessConfig {
        &self.config
    }

    /// Run the full pipeline on freshly generated audio.
    pub fn process(
        &self,
        buffer: AudioBuffer,
        tone: Tone,
        mood: Mood,
        format: AudioFormat,
    ) -> Result<AudioArtifact, SynthesisError> {
        let trimmed = self.trim_silence(buffer)?;
        let shaped = self.apply_tone_mood(trimmed, tone, mood)?;
        self.export(shaped, format)
    }

    pub fn trim_silence(&self, buffer: AudioBuffer) -> Result<AudioBuffer, SynthesisError> {
        if buffer.is_empty() || buffer.sample_rate == 0 {
            return Err(SynthesisError::encoding(
                PostStage::Trim,
                "backend returned no audio",
            ));
        }
        Ok(trim::trim_silence(buffer, &self.config.trim))
    }

    /// Apply a tone preset scaled by mood. Neutral settings return the buffer
    /// untouched.
    pub fn apply_tone_mood(
        &self,
        buffer: AudioBuffer,
        tone: Tone,
        mood: Mood,
    ) -> Result<AudioBuffer, SynthesisError> {
        let shaping = tone::shaping(tone, mood);
        if shaping.is_identity() {
            return Ok(buffer);
        }
        log::debug!(
            "Applying tone {tone} at mood {mood}: speed x{:.3}, gain {:+.1} dB",
            shaping.speed,
            shaping.gain_db
        );

        let rate = buffer.sample_rate;
        let mut mono = buffer.into_mono();
        if (shaping.speed - 1.0).abs() > 1e-3 {
            mono.samples = tone::time_stretch(&mono.samples, rate, shaping.speed);
        }
        tone::apply_gain(&mut mono.samples, shaping.gain_db);

        if mono.is_empty() {
            return Err(SynthesisError::encoding(
                PostStage::ToneMood,
                "time stretch produced no audio",
            ));
        }
        Ok(mono)
    }

    /// Downmix to mono at the export rate.
    pub fn normalize(&self, buffer: AudioBuffer) -> Result<AudioBuffer, SynthesisError> {
        if buffer.samples.iter().any(|s| !s.is_finite()) {
            return Err(SynthesisError::encoding(
                PostStage::Normalize,
                "audio contains non-finite samples",
            ));
        }
        let resampled = buffer
            .into_mono()
            .resample(self.config.export_sample_rate)
            .map_err(|e| SynthesisError::encoding(PostStage::Normalize, e.to_string()))?;
        if resampled.is_empty() {
            return Err(SynthesisError::encoding(
                PostStage::Normalize,
                "resampling produced no audio",
            ));
        }
        Ok(resampled)
    }

    /// Normalize and encode without trimming or shaping. Used to re-export
    /// audio that was already processed or edited.
    pub fn export(
        &self,
        buffer: AudioBuffer,
        format: AudioFormat,
    ) -> Result<AudioArtifact, SynthesisError> {
        let normalized = self.normalize(buffer)?;
        let bytes = match format {
            AudioFormat::Wav => encode::encode_wav(&normalized),
            AudioFormat::Mp3 => encode::encode_mp3(&normalized),
        }
        .map_err(|e| SynthesisError::encoding(PostStage::Encode, e.to_string()))?;

        Ok(AudioArtifact {
            bytes,
            format,
            sample_rate: normalized.sample_rate,
            channels: normalized.channels,
            duration: normalized.duration(),
            path: None,
        })
    }
}
