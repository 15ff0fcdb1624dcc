//! Speaker gender and text language detection for new cloned voices.
//!
//! Detection is best effort. A failure yields [`Gender::Unknown`] or `None`
//! and never blocks profile creation.

use std::path::Path;

use super::Gender;
use crate::audio::AudioBuffer;

/// Mean F0 above this is classified as a female speaker.
pub const FEMALE_F0_THRESHOLD_HZ: f32 = 165.0;

/// Collaborator that inspects a reference recording and sample text.
pub trait VoiceClassifier: Send + Sync {
    fn detect_gender(&self, reference_audio: &Path) -> Gender;

    /// Primary language subtag of `text`, or `None` if undecidable.
    fn detect_language(&self, text: &str) -> Option<String>;
}

/// Default classifier: autocorrelation pitch tracking plus a script and
/// stop-word heuristic for language.
#[derive(Debug, Clone)]
pub struct PitchClassifier {
    /// Only the first `max_seconds` of the recording are analysed.
    pub max_seconds: f32,
    pub min_f0_hz: f32,
    pub max_f0_hz: f32,
}

impl Default for PitchClassifier {
    fn default() -> Self {
        Self {
            max_seconds: 30.0,
            // C2 .. C6
            min_f0_hz: 65.0,
            max_f0_hz: 1046.0,
        }
    }
}

impl PitchClassifier {
    /// Mean fundamental frequency over voiced frames, `None` when no frame is voiced.
    pub fn mean_f0(&self, buffer: &AudioBuffer) -> Option<f32> {
        let rate = buffer.sample_rate as f32;
        if rate <= 0.0 {
            return None;
        }
        let mono = buffer.clone().into_mono();
        let limit = ((self.max_seconds * rate) as usize).min(mono.samples.len());
        let samples = &mono.samples[..limit];

        let min_lag = (rate / self.max_f0_hz).floor().max(1.0) as usize;
        let max_lag = (rate / self.min_f0_hz).ceil() as usize;
        let frame_len = max_lag * 2;
        if samples.len() < frame_len {
            return None;
        }

        let mut sum = 0.0f32;
        let mut voiced = 0usize;
        for frame in samples.chunks_exact(frame_len) {
            if let Some(f0) = frame_pitch(frame, min_lag, max_lag, rate) {
                sum += f0;
                voiced += 1;
            }
        }
        (voiced > 0).then(|| sum / voiced as f32)
    }
}

impl VoiceClassifier for PitchClassifier {
    fn detect_gender(&self, reference_audio: &Path) -> Gender {
        let buffer = match AudioBuffer::from_file(reference_audio) {
            Ok(buffer) => buffer,
            Err(e) => {
                log::warn!("Could not analyse {}: {e}", reference_audio.display());
                return Gender::Unknown;
            }
        };
        match self.mean_f0(&buffer) {
            Some(f0) => {
                log::debug!("Mean F0 of {}: {f0:.1} Hz", reference_audio.display());
                if f0 > FEMALE_F0_THRESHOLD_HZ {
                    Gender::Female
                } else {
                    Gender::Male
                }
            }
            None => Gender::Unknown,
        }
    }

    fn detect_language(&self, text: &str) -> Option<String> {
        detect_text_language(text)
    }
}

/// Pitch of one frame from the normalized autocorrelation peak.
fn frame_pitch(frame: &[f32], min_lag: usize, max_lag: usize, rate: f32) -> Option<f32> {
    let energy: f32 = frame.iter().map(|s| s * s).sum();
    // about -50 dBFS RMS
    if energy / (frame.len() as f32) < 1e-5 {
        return None;
    }

    let window = frame.len() - max_lag;
    let max_lag = max_lag.min(frame.len() - 1);
    let scores: Vec<f32> = (min_lag..=max_lag)
        .map(|lag| {
            let mut acc = 0.0f32;
            let mut e0 = 0.0f32;
            let mut e1 = 0.0f32;
            for i in 0..window {
                let a = frame[i];
                let b = frame[i + lag];
                acc += a * b;
                e0 += a * a;
                e1 += b * b;
            }
            let norm = (e0 * e1).sqrt();
            if norm <= f32::EPSILON {
                0.0
            } else {
                acc / norm
            }
        })
        .collect();

    let best = scores.iter().copied().fold(0.0f32, f32::max);
    if best < 0.6 {
        return None;
    }
    // Earliest strong peak, so multiples of the period are not mistaken for it.
    let mut idx = scores.iter().position(|&r| r >= best * 0.9)?;
    while idx + 1 < scores.len() && scores[idx + 1] > scores[idx] {
        idx += 1;
    }
    Some(rate / (min_lag + idx) as f32)
}

const STOP_WORDS: &[(&str, &[&str])] = &[
    ("en", &["the", "and", "is", "are", "you", "that", "of", "to", "with", "this"]),
    ("fr", &["le", "la", "les", "et", "est", "une", "vous", "je", "pas", "avec"]),
    ("de", &["der", "die", "das", "und", "ist", "nicht", "ich", "sie", "mit", "ein"]),
    ("es", &["el", "los", "las", "y", "es", "una", "que", "por", "con", "para"]),
    ("it", &["il", "gli", "e", "che", "non", "una", "sono", "per", "della", "con"]),
    ("pt", &["o", "os", "as", "e", "uma", "que", "não", "com", "para", "você"]),
    ("nl", &["de", "het", "een", "en", "is", "niet", "ik", "dat", "met", "van"]),
    ("pl", &["i", "nie", "jest", "się", "że", "na", "to", "w", "z", "jak"]),
];

/// Guess the language of `text` from its script, then from stop words.
pub fn detect_text_language(text: &str) -> Option<String> {
    let mut counts = [0usize; 7];
    for c in text.chars() {
        let slot = match c {
            '\u{3040}'..='\u{30ff}' => 0,                        // kana
            '\u{ac00}'..='\u{d7af}' | '\u{1100}'..='\u{11ff}' => 1, // hangul
            '\u{4e00}'..='\u{9fff}' => 2,                        // han
            '\u{0400}'..='\u{04ff}' => 3,                        // cyrillic
            '\u{0600}'..='\u{06ff}' => 4,                        // arabic
            '\u{0900}'..='\u{097f}' => 5,                        // devanagari
            c if c.is_alphabetic() => 6,
            _ => continue,
        };
        counts[slot] += 1;
    }

    let total: usize = counts.iter().sum();
    if total == 0 {
        return None;
    }
    // Japanese text mixes kana with han.
    if counts[0] > 0 {
        return Some("ja".into());
    }
    let (slot, _) = counts
        .iter()
        .enumerate()
        .max_by_key(|(_, n)| **n)
        .filter(|(_, n)| **n > 0)?;
    let code = match slot {
        1 => "ko",
        2 => "zh",
        3 => {
            if text.chars().any(|c| matches!(c, 'і' | 'ї' | 'є' | 'ґ')) {
                "uk"
            } else {
                "ru"
            }
        }
        4 => "ar",
        5 => "hi",
        _ => return latin_language(text),
    };
    Some(code.into())
}

fn latin_language(text: &str) -> Option<String> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    STOP_WORDS
        .iter()
        .map(|(code, stops)| {
            let hits = words.iter().filter(|w| stops.contains(&w.as_str())).count();
            (*code, hits)
        })
        .filter(|(_, hits)| *hits > 0)
        // first entry wins ties
        .fold(None::<(&str, usize)>, |best, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
        .map(|(code, _)| code.to_string())
}
