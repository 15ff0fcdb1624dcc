use std::path::{Path, PathBuf};

use derive_builder::Builder;

use crate::audio::AudioFormat;
use crate::postprocess::{Mood, Tone};

/// One text-to-speech job. Immutable once built.
///
/// ```
/// use tts_studio::{Mood, SynthesisRequest, Tone};
///
/// let request = SynthesisRequest::builder()
///     .text("Good morning")
///     .voice_id("en-GB-SoniaNeural")
///     .tone(Tone::Upbeat)
///     .mood(Mood::new(7)?)
///     .build()?;
/// assert_eq!(request.voice_id(), "en-GB-SoniaNeural");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct SynthesisRequest {
    text: String,
    voice_id: String,
    #[builder(default)]
    tone: Tone,
    #[builder(default)]
    mood: Mood,
    #[builder(default)]
    output_format: AudioFormat,
    /// Where to write the artifact; kept in memory only when unset.
    #[builder(setter(into, strip_option), default)]
    output_path: Option<PathBuf>,
}

impl SynthesisRequestBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(text) = &self.text {
            if text.trim().is_empty() {
                return Err("text must not be empty".to_string());
            }
        }
        if let Some(voice_id) = &self.voice_id {
            if voice_id.trim().is_empty() {
                return Err("voice_id must not be empty".to_string());
            }
        }
        Ok(())
    }
}

impl SynthesisRequest {
    pub fn builder() -> SynthesisRequestBuilder {
        SynthesisRequestBuilder::default()
    }

    /// Request with neutral tone and mood, exported as WAV in memory.
    pub fn new(
        text: impl Into<String>,
        voice_id: impl Into<String>,
    ) -> Result<Self, SynthesisRequestBuilderError> {
        Self::builder().text(text).voice_id(voice_id).build()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    pub fn tone(&self) -> Tone {
        self.tone
    }

    pub fn mood(&self) -> Mood {
        self.mood
    }

    pub fn output_format(&self) -> AudioFormat {
        self.output_format
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_neutral() {
        let request = SynthesisRequest::new("Hi", "en-US-AriaNeural").unwrap();
        assert_eq!(request.tone(), Tone::Normal);
        assert_eq!(request.mood(), Mood::NEUTRAL);
        assert_eq!(request.output_format(), AudioFormat::Wav);
        assert_eq!(request.output_path(), None);
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(SynthesisRequest::new("   ", "en-US-AriaNeural").is_err());
        assert!(SynthesisRequest::new("Hi", "").is_err());
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(SynthesisRequest::builder().text("Hi").build().is_err());
    }

    #[test]
    fn output_path_setter_strips_option() {
        let request = SynthesisRequest::builder()
            .text("Hi")
            .voice_id("v")
            .output_path("out/hi.mp3")
            .output_format(AudioFormat::Mp3)
            .build()
            .unwrap();
        assert_eq!(request.output_path(), Some(Path::new("out/hi.mp3")));
    }
}
