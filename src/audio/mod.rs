//! Decoded audio buffers and encoded export artifacts.

pub mod resample;

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),
    #[error("Resampling failed: {0}")]
    Resample(String),
    #[error("Invalid audio: {0}")]
    Invalid(String),
}

/// Export container requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// 16-bit PCM, lossless.
    #[default]
    Wav,
    /// MPEG layer III at a fixed bitrate.
    Mp3,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }

    /// Pick a format from a file name, defaulting to WAV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("mp3") => AudioFormat::Mp3,
            _ => AudioFormat::Wav,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Raw decoded audio.
///
/// Samples are interleaved f32 in `[-1, 1]`. A buffer is moved from stage to
/// stage; nothing holds a second mutable reference to it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved samples
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Duration of the audio.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Duration of the audio in milliseconds, rounded down.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }

    /// Average all channels into one.
    pub fn into_mono(self) -> Self {
        if self.channels == 1 {
            return self;
        }
        let channels = self.channels as usize;
        let samples = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Self::mono(samples, self.sample_rate)
    }

    /// Split interleaved samples into one vector per channel.
    pub fn deinterleave(&self) -> Vec<Vec<f32>> {
        let channels = self.channels as usize;
        let mut planes = vec![Vec::with_capacity(self.frames()); channels];
        for frame in self.samples.chunks_exact(channels) {
            for (plane, &s) in planes.iter_mut().zip(frame) {
                plane.push(s);
            }
        }
        planes
    }

    /// Build a buffer from per-channel planes of equal length.
    pub fn interleave(planes: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let channels = planes.len().max(1);
        let frames = planes.first().map_or(0, Vec::len);
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            for plane in &planes {
                samples.push(plane.get(i).copied().unwrap_or(0.0));
            }
        }
        Self::new(samples, sample_rate, channels as u16)
    }

    /// Convert to another sample rate. The output never holds more frames than
    /// `frames * to / from`, so the duration cannot grow.
    pub fn resample(self, to_rate: u32) -> Result<Self, AudioError> {
        if self.sample_rate == to_rate || self.is_empty() {
            return Ok(Self {
                sample_rate: to_rate,
                ..self
            });
        }
        let planes = resample::resample_planes(self.deinterleave(), self.sample_rate, to_rate)?;
        Ok(Self::interleave(planes, to_rate))
    }

    /// Copy out the frames in `[start, end)`.
    pub fn slice_frames(&self, start: usize, end: usize) -> Self {
        let channels = self.channels as usize;
        let end = end.min(self.frames());
        let start = start.min(end);
        Self::new(
            self.samples[start * channels..end * channels].to_vec(),
            self.sample_rate,
            self.channels,
        )
    }

    /// Keep only `[start_ms, end_ms)`; both bounds are clamped to the buffer.
    pub fn trim_range(&self, start_ms: u64, end_ms: u64) -> Result<Self, AudioError> {
        if end_ms <= start_ms {
            return Err(AudioError::Invalid(format!(
                "trim range {start_ms}..{end_ms} ms is empty"
            )));
        }
        let frames = self.frames() as u64;
        let to_frame = |ms: u64| (ms.saturating_mul(self.sample_rate as u64) / 1000).min(frames) as usize;
        let trimmed = self.slice_frames(to_frame(start_ms), to_frame(end_ms));
        if trimmed.is_empty() {
            return Err(AudioError::Invalid(format!(
                "trim range {start_ms}..{end_ms} ms lies outside {} ms of audio",
                self.duration_ms()
            )));
        }
        Ok(trimmed)
    }

    /// Decode a RIFF/WAV byte stream (integer or float PCM).
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, AudioError> {
        Self::from_wav_reader(hound::WavReader::new(Cursor::new(bytes))?)
    }

    /// Decode a WAV file from disk.
    pub fn from_wav_file(path: &Path) -> Result<Self, AudioError> {
        Self::from_wav_reader(hound::WavReader::open(path)?)
    }

    /// Decode an audio file. WAV goes through hound; anything else
    /// (MP3, FLAC, OGG) is probed by symphonia.
    pub fn from_file(path: &Path) -> Result<Self, AudioError> {
        match Self::from_wav_file(path) {
            Err(AudioError::Wav(hound::Error::FormatError(_))) => Self::from_compressed_file(path),
            other => other,
        }
    }

    fn from_compressed_file(path: &Path) -> Result<Self, AudioError> {
        use symphonia::core::audio::SampleBuffer;
        use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
        use symphonia::core::errors::Error as DecodeError;
        use symphonia::core::formats::FormatOptions;
        use symphonia::core::io::MediaSourceStream;
        use symphonia::core::meta::MetadataOptions;
        use symphonia::core::probe::Hint;

        let file = std::fs::File::open(path)?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let mut format = symphonia::default::get_probe()
            .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())?
            .format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioError::Invalid(format!("{}: no audio track", path.display())))?;
        let track_id = track.id;
        let mut decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut samples = Vec::new();
        let mut spec = None;
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(DecodeError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(DecodeError::DecodeError(e)) => {
                    log::debug!("Skipping corrupt frame in {}: {e}", path.display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let frame_spec = *decoded.spec();
            let mut interleaved = SampleBuffer::<f32>::new(decoded.capacity() as u64, frame_spec);
            interleaved.copy_interleaved_ref(decoded);
            samples.extend_from_slice(interleaved.samples());
            spec.get_or_insert(frame_spec);
        }

        let spec = spec.ok_or_else(|| AudioError::Invalid(format!("{}: no audio frames", path.display())))?;
        Ok(Self::new(samples, spec.rate, spec.channels.count() as u16))
    }

    fn from_wav_reader<R: std::io::Read>(mut reader: hound::WavReader<R>) -> Result<Self, AudioError> {
        let spec = reader.spec();
        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(Self::new(samples, spec.sample_rate, spec.channels))
    }

    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), AudioError> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// Encoded audio ready for export.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioArtifact {
    /// Encoded file contents
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
    /// Exact duration of the encoded PCM
    pub duration: Duration,
    /// Where the artifact was written, when the request named a path
    pub path: Option<PathBuf>,
}

impl AudioArtifact {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Write the encoded bytes to `path` and remember it.
    pub fn save(&mut self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.bytes)?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, channels: u16) -> AudioBuffer {
        let samples = (0..frames * channels as usize)
            .map(|i| (i % 100) as f32 / 100.0)
            .collect();
        AudioBuffer::new(samples, 1000, channels)
    }

    #[test]
    fn duration_counts_frames_not_samples() {
        let buffer = ramp(2000, 2);
        assert_eq!(buffer.frames(), 2000);
        assert_eq!(buffer.duration_ms(), 2000);
    }

    #[test]
    fn into_mono_averages_channels() {
        let buffer = AudioBuffer::new(vec![1.0, 0.0, 0.5, 0.5], 8000, 2);
        let mono = buffer.into_mono();
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples, vec![0.5, 0.5]);
    }

    #[test]
    fn deinterleave_and_interleave_are_inverse() {
        let buffer = ramp(10, 2);
        let rebuilt = AudioBuffer::interleave(buffer.deinterleave(), buffer.sample_rate);
        assert_eq!(rebuilt, buffer);
    }

    #[test]
    fn trim_range_clamps_to_buffer() {
        let buffer = ramp(1000, 1);
        let trimmed = buffer.trim_range(250, 5000).unwrap();
        assert_eq!(trimmed.duration_ms(), 750);

        let whole = buffer.trim_range(0, u64::MAX).unwrap();
        assert_eq!(whole, buffer);
    }

    #[test]
    fn trim_range_rejects_empty_window() {
        let buffer = ramp(1000, 1);
        assert!(buffer.trim_range(500, 500).is_err());
        assert!(buffer.trim_range(2000, 3000).is_err());
    }

    #[test]
    fn wav_file_round_trip_preserves_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let buffer = ramp(500, 1);
        buffer.write_wav(&path).unwrap();
        let decoded = AudioBuffer::from_wav_file(&path).unwrap();
        assert_eq!(decoded, buffer);
    }

    #[test]
    fn format_from_path_recognises_mp3() {
        assert_eq!(AudioFormat::from_path(Path::new("out.MP3")), AudioFormat::Mp3);
        assert_eq!(AudioFormat::from_path(Path::new("out.wav")), AudioFormat::Wav);
        assert_eq!(AudioFormat::from_path(Path::new("out")), AudioFormat::Wav);
    }
}
