//! Tone presets, mood intensity and the pitch-preserving time stretch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Delivery preset: a speed factor and a gain offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Tone {
    #[default]
    Normal,
    Upbeat,
    Angry,
    Excited,
}

impl Tone {
    pub const ALL: [Tone; 4] = [Tone::Normal, Tone::Upbeat, Tone::Angry, Tone::Excited];

    /// `(speed factor, gain in dB)` at neutral mood.
    pub fn params(self) -> (f32, f32) {
        match self {
            Tone::Normal => (1.00, 0.0),
            Tone::Upbeat => (1.10, 2.0),
            Tone::Angry => (0.95, 4.0),
            Tone::Excited => (1.15, 3.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Normal => "Normal",
            Tone::Upbeat => "Upbeat",
            Tone::Angry => "Angry",
            Tone::Excited => "Excited",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tone::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown tone '{s}'"))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Mood must be between {min} and {max}, got {0}", min = Mood::MIN, max = Mood::MAX)]
pub struct InvalidMood(pub u8);

/// Intensity level from 1 to 10; 5 leaves a tone preset as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Mood(u8);

impl Mood {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;
    pub const NEUTRAL: Mood = Mood(5);

    pub fn new(level: u8) -> Result<Self, InvalidMood> {
        if (Self::MIN..=Self::MAX).contains(&level) {
            Ok(Mood(level))
        } else {
            Err(InvalidMood(level))
        }
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// Multiplier applied to a preset's deviation from neutral: 0.2 at 1,
    /// 1.0 at 5, 2.0 at 10.
    pub fn scale(self) -> f32 {
        (self.0 as f32 - 5.0) / 5.0 + 1.0
    }
}

impl Default for Mood {
    fn default() -> Self {
        Mood::NEUTRAL
    }
}

impl TryFrom<u8> for Mood {
    type Error = InvalidMood;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Mood::new(level)
    }
}

impl From<Mood> for u8 {
    fn from(mood: Mood) -> Self {
        mood.0
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fastest allowed speed factor.
pub const MAX_SPEED: f32 = 2.5;

/// Speed factor and gain produced by a tone at a mood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shaping {
    pub speed: f32,
    pub gain_db: f32,
}

impl Shaping {
    pub fn is_identity(&self) -> bool {
        (self.speed - 1.0).abs() <= 1e-3 && self.gain_db.abs() <= 1e-3
    }
}

/// Scale the preset by the mood. The speed is clamped to `[1.0, MAX_SPEED]`
/// so shaping never lengthens the audio.
pub fn shaping(tone: Tone, mood: Mood) -> Shaping {
    if tone == Tone::Normal && mood == Mood::NEUTRAL {
        return Shaping {
            speed: 1.0,
            gain_db: 0.0,
        };
    }
    let (speed, gain_db) = tone.params();
    let scale = mood.scale();
    let speed = if (speed - 1.0).abs() > 1e-3 {
        (1.0 + (speed - 1.0) * scale).clamp(1.0, MAX_SPEED)
    } else {
        1.0
    };
    Shaping {
        speed,
        gain_db: gain_db * scale,
    }
}

/// Multiply every sample by a gain in dB.
pub fn apply_gain(samples: &mut [f32], gain_db: f32) {
    if gain_db.abs() <= 1e-3 {
        return;
    }
    let factor = 10f32.powf(gain_db / 20.0);
    for s in samples {
        *s *= factor;
    }
}

/// WSOLA time stretch of a mono signal. `factor > 1` speeds up.
///
/// The output holds `floor(len / factor)` samples (at least one) and keeps
/// the pitch of the input.
pub fn time_stretch(samples: &[f32], sample_rate: u32, factor: f32) -> Vec<f32> {
    if samples.is_empty() || (factor - 1.0).abs() <= 1e-4 || factor <= 0.0 {
        return samples.to_vec();
    }
    let out_len = ((samples.len() as f64 / factor as f64).floor() as usize).max(1);

    // 30 ms frames, half overlap
    let win_len = ((sample_rate as usize * 3 / 100) & !1).max(64);
    if samples.len() < win_len * 2 {
        // too short to overlap-add: cut or pad to length
        let mut out = samples[..out_len.min(samples.len())].to_vec();
        out.resize(out_len, 0.0);
        return out;
    }
    let hop = win_len / 2;
    let tolerance = win_len / 4;
    let window: Vec<f32> = (0..win_len)
        .map(|i| {
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / win_len as f32).cos()
        })
        .collect();

    let last_start = samples.len() - win_len;
    let mut out = vec![0.0f32; out_len + win_len];
    let mut norm = vec![0.0f32; out_len + win_len];
    let mut prev: Option<usize> = None;

    let mut out_pos = 0;
    while out_pos < out_len {
        let nominal = ((out_pos as f64 * factor as f64) as usize).min(last_start);
        let offset = match prev {
            None => nominal,
            Some(p) => best_offset(samples, nominal, (p + hop).min(last_start), hop, tolerance, last_start),
        };
        for i in 0..win_len {
            out[out_pos + i] += samples[offset + i] * window[i];
            norm[out_pos + i] += window[i];
        }
        prev = Some(offset);
        out_pos += hop;
    }

    out.truncate(out_len);
    for (s, n) in out.iter_mut().zip(&norm) {
        if *n > 1e-3 {
            *s /= n;
        }
    }
    out
}

/// Offset near `nominal` whose start best continues the segment at `natural`.
fn best_offset(
    samples: &[f32],
    nominal: usize,
    natural: usize,
    overlap: usize,
    tolerance: usize,
    last_start: usize,
) -> usize {
    let lo = nominal.saturating_sub(tolerance);
    let hi = (nominal + tolerance).min(last_start);
    let reference = &samples[natural..natural + overlap];

    let mut best = nominal;
    let mut best_score = f32::NEG_INFINITY;
    for candidate in lo..=hi {
        let score: f32 = reference
            .iter()
            .zip(&samples[candidate..candidate + overlap])
            .step_by(2)
            .map(|(a, b)| a * b)
            .sum();
        if score > best_score {
            best_score = score;
            best = candidate;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mood_range_is_enforced() {
        assert!(Mood::new(0).is_err());
        assert!(Mood::new(11).is_err());
        assert_eq!(Mood::new(10).unwrap().scale(), 2.0);
        assert!((Mood::new(1).unwrap().scale() - 0.2).abs() < 1e-6);
        assert_eq!(Mood::default().scale(), 1.0);
        assert_eq!(
            Mood::new(11).unwrap_err().to_string(),
            "Mood must be between 1 and 10, got 11"
        );
    }

    #[test]
    fn mood_deserializes_through_validation() {
        let mood: Mood = serde_json::from_str("7").unwrap();
        assert_eq!(mood.level(), 7);
        assert!(serde_json::from_str::<Mood>("42").is_err());
    }

    #[test]
    fn tone_parses_case_insensitively() {
        assert_eq!("excited".parse::<Tone>().unwrap(), Tone::Excited);
        assert!("sleepy".parse::<Tone>().is_err());
    }

    #[test]
    fn neutral_shaping_is_identity() {
        assert!(shaping(Tone::Normal, Mood::NEUTRAL).is_identity());
        assert!(shaping(Tone::Normal, Mood::new(9).unwrap()).is_identity());
    }

    #[test]
    fn mood_scales_speed_and_gain() {
        let s = shaping(Tone::Upbeat, Mood::new(10).unwrap());
        assert!((s.speed - 1.2).abs() < 1e-5);
        assert!((s.gain_db - 4.0).abs() < 1e-5);

        let s = shaping(Tone::Excited, Mood::new(1).unwrap());
        assert!((s.speed - 1.03).abs() < 1e-5);
        assert!((s.gain_db - 0.6).abs() < 1e-5);
    }

    #[test]
    fn slowing_presets_never_lengthen() {
        for level in Mood::MIN..=Mood::MAX {
            let s = shaping(Tone::Angry, Mood::new(level).unwrap());
            assert_eq!(s.speed, 1.0);
            assert!(s.gain_db > 0.0);
        }
    }

    #[test]
    fn gain_in_db_scales_amplitude() {
        let mut samples = vec![0.1f32; 4];
        apply_gain(&mut samples, 20.0);
        assert!((samples[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn stretch_output_length_follows_factor() {
        let samples: Vec<f32> = (0..24_000)
            .map(|i| (2.0 * std::f32::consts::PI * 200.0 * i as f32 / 24_000.0).sin())
            .collect();
        let out = time_stretch(&samples, 24_000, 1.2);
        assert_eq!(out.len(), 20_000);
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn stretch_keeps_pitch() {
        let rate = 24_000;
        let samples: Vec<f32> = (0..rate)
            .map(|i| (2.0 * std::f32::consts::PI * 200.0 * i as f32 / rate as f32).sin())
            .collect();
        let out = time_stretch(&samples, rate, 1.5);
        // count rising zero crossings in the steady middle part
        let mid = &out[2_000..14_000];
        let crossings = mid.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count();
        let freq = crossings as f32 / (mid.len() as f32 / rate as f32);
        assert!((freq - 200.0).abs() < 15.0, "freq = {freq}");
    }

    #[test]
    fn stretch_of_tiny_input_is_never_empty() {
        assert_eq!(time_stretch(&[0.5, 0.5], 24_000, 2.5).len(), 1);
    }

    #[test]
    fn stretch_of_short_input_cuts_or_pads() {
        // 40 ms, shorter than two analysis frames
        let samples: Vec<f32> = (0..960)
            .map(|i| (2.0 * std::f32::consts::PI * 200.0 * i as f32 / 24_000.0).sin())
            .collect();
        let faster = time_stretch(&samples, 24_000, 1.5);
        assert_eq!(faster, samples[..640].to_vec());

        let slower = time_stretch(&samples, 24_000, 0.75);
        assert_eq!(slower.len(), 1280);
        assert_eq!(&slower[..960], &samples[..]);
        assert!(slower[960..].iter().all(|s| *s == 0.0));
    }
}
