use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;

/// Leading/trailing silence removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimSettings {
    /// Frames whose RMS is below this level (dBFS) count as silence.
    pub threshold_db: f32,
    /// Analysis frame length.
    pub frame_ms: u32,
    /// Silence kept on each side of the detected speech.
    pub padding_ms: u32,
    /// Shorter results are widened back to this length (or the whole input).
    pub min_retained_ms: u32,
}

impl Default for TrimSettings {
    fn default() -> Self {
        Self {
            threshold_db: -45.0,
            frame_ms: 10,
            padding_ms: 30,
            min_retained_ms: 250,
        }
    }
}

/// Frame range `[start, end)` to keep. Never empty for a non-empty buffer;
/// all-silent input is kept whole.
pub fn speech_bounds(buffer: &AudioBuffer, settings: &TrimSettings) -> (usize, usize) {
    let frames = buffer.frames();
    if frames == 0 {
        return (0, 0);
    }
    let ms_to_frames = |ms: u32| (ms as u64 * buffer.sample_rate as u64 / 1000) as usize;
    let window = ms_to_frames(settings.frame_ms).max(1);
    let threshold = 10f32.powf(settings.threshold_db / 20.0);
    let channels = buffer.channels as usize;

    let loud = |chunk: &[f32]| {
        let mean_square = chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32;
        mean_square.sqrt() >= threshold
    };

    let windows: Vec<bool> = buffer
        .samples
        .chunks(window * channels)
        .map(loud)
        .collect();

    let (Some(first), Some(last)) = (
        windows.iter().position(|&l| l),
        windows.iter().rposition(|&l| l),
    ) else {
        log::debug!("No speech above {} dBFS; keeping all audio", settings.threshold_db);
        return (0, frames);
    };

    let padding = ms_to_frames(settings.padding_ms);
    let mut start = (first * window).saturating_sub(padding);
    let mut end = ((last + 1) * window + padding).min(frames);

    let min_len = ms_to_frames(settings.min_retained_ms).min(frames);
    if end - start < min_len {
        let missing = min_len - (end - start);
        start = start.saturating_sub(missing / 2);
        end = (start + min_len).min(frames);
        start = end - min_len;
    }
    (start, end)
}

/// Remove leading and trailing silence.
pub fn trim_silence(buffer: AudioBuffer, settings: &TrimSettings) -> AudioBuffer {
    let (start, end) = speech_bounds(&buffer, settings);
    if start == 0 && end == buffer.frames() {
        return buffer;
    }
    log::debug!(
        "Trimmed {} ms of silence",
        (buffer.frames() - (end - start)) as u64 * 1000 / buffer.sample_rate.max(1) as u64
    );
    buffer.slice_frames(start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1000;

    fn padded_tone(silence: usize, tone: usize) -> AudioBuffer {
        let mut samples = vec![0.0; silence];
        samples.extend((0..tone).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }));
        samples.extend(vec![0.0; silence]);
        AudioBuffer::mono(samples, RATE)
    }

    #[test]
    fn strips_silence_with_padding() {
        let buffer = padded_tone(1000, 500);
        let settings = TrimSettings::default();
        let (start, end) = speech_bounds(&buffer, &settings);
        assert_eq!(start, 970);
        assert_eq!(end, 1530);
    }

    #[test]
    fn keeps_minimum_duration() {
        let buffer = padded_tone(1000, 20);
        let settings = TrimSettings::default();
        let (start, end) = speech_bounds(&buffer, &settings);
        assert_eq!(end - start, 250);
        assert!(start <= 1000 && end >= 1020);
    }

    #[test]
    fn silent_input_is_kept_whole() {
        let buffer = AudioBuffer::mono(vec![0.0; 800], RATE);
        let trimmed = trim_silence(buffer.clone(), &TrimSettings::default());
        assert_eq!(trimmed, buffer);
    }

    #[test]
    fn short_input_is_never_emptied() {
        let buffer = AudioBuffer::mono(vec![0.0, 0.2, 0.0], RATE);
        let trimmed = trim_silence(buffer, &TrimSettings::default());
        assert!(!trimmed.is_empty());
    }
}
