use std::io::Cursor;

use mp3lame_encoder::{max_required_buffer_size, Bitrate, Builder, FlushNoGap, MonoPcm, Quality};

use crate::audio::AudioBuffer;

/// MP3 exports are always constant bitrate at 192 kbps.
pub const MP3_BITRATE_KBPS: u32 = 192;

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("WAV encoder: {0}")]
    Wav(#[from] hound::Error),
    #[error("MP3 encoder: {0}")]
    Mp3(String),
    #[error("expected mono audio, got {0} channels")]
    NotMono(u16),
}

/// Convert a float sample to 16-bit PCM, clipping out-of-range values.
pub fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// 16-bit PCM RIFF/WAV.
pub fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>, EncodeError> {
    let spec = hound::WavSpec {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + buffer.samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in &buffer.samples {
            writer.write_sample(to_i16(sample))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Mono MPEG layer III at [`MP3_BITRATE_KBPS`].
pub fn encode_mp3(buffer: &AudioBuffer) -> Result<Vec<u8>, EncodeError> {
    if buffer.channels != 1 {
        return Err(EncodeError::NotMono(buffer.channels));
    }
    let lame = |what: &str, e: &dyn std::fmt::Debug| EncodeError::Mp3(format!("{what}: {e:?}"));

    let mut builder = Builder::new().ok_or_else(|| EncodeError::Mp3("LAME init failed".into()))?;
    builder
        .set_num_channels(1)
        .map_err(|e| lame("channels", &e))?;
    builder
        .set_sample_rate(buffer.sample_rate)
        .map_err(|e| lame("sample rate", &e))?;
    builder
        .set_brate(Bitrate::Kbps192)
        .map_err(|e| lame("bitrate", &e))?;
    builder
        .set_quality(Quality::Good)
        .map_err(|e| lame("quality", &e))?;
    let mut encoder = builder.build().map_err(|e| lame("build", &e))?;

    let pcm: Vec<i16> = buffer.samples.iter().copied().map(to_i16).collect();
    let mut out = Vec::with_capacity(max_required_buffer_size(pcm.len()) + 7200);
    encoder
        .encode_to_vec(MonoPcm(&pcm), &mut out)
        .map_err(|e| lame("encode", &e))?;
    encoder
        .flush_to_vec::<FlushNoGap>(&mut out)
        .map_err(|e| lame("flush", &e))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(rate: u32, frames: usize) -> AudioBuffer {
        let samples = (0..frames)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
            .collect();
        AudioBuffer::mono(samples, rate)
    }

    #[test]
    fn clipping_conversion() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), -i16::MAX);
        assert_eq!(to_i16(0.0), 0);
    }

    #[test]
    fn wav_is_16_bit_pcm() {
        let buffer = tone(44_100, 4410);
        let bytes = encode_wav(&buffer).unwrap();
        let reader = hound::WavReader::new(Cursor::new(&bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(reader.duration(), 4410);
    }

    #[test]
    fn mp3_has_frame_sync() {
        let bytes = encode_mp3(&tone(44_100, 44_100)).unwrap();
        assert!(bytes.len() > 1000);
        let synced = bytes.windows(2).any(|w| w[0] == 0xFF && (w[1] & 0xE0) == 0xE0);
        assert!(synced);
    }

    #[test]
    fn mp3_rejects_stereo() {
        let buffer = AudioBuffer::new(vec![0.0; 8], 44_100, 2);
        assert!(matches!(encode_mp3(&buffer), Err(EncodeError::NotMono(2))));
    }
}
