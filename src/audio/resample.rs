//! Sample-rate conversion with rubato's sinc interpolator.

use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

use super::AudioError;

/// Input frames fed to the resampler per call.
const CHUNK_SIZE: usize = 1024;

/// Upper bound on flush calls after the input runs out.
const MAX_FLUSH_CALLS: usize = 16;

/// Resample one vector per channel from `from_rate` to `to_rate`.
///
/// The filter delay is removed and every output plane holds exactly
/// `frames * to_rate / from_rate` frames (rounded down).
pub fn resample_planes(
    planes: Vec<Vec<f32>>,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<Vec<f32>>, AudioError> {
    let frames = planes.first().map_or(0, Vec::len);
    if from_rate == to_rate || frames == 0 || planes.is_empty() {
        return Ok(planes);
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(AudioError::Resample(format!(
            "cannot resample {from_rate} Hz -> {to_rate} Hz"
        )));
    }

    let expected = (frames as u64 * to_rate as u64 / from_rate as u64) as usize;

    let sinc_len = 128;
    let window = WindowFunction::Blackman2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Quadratic,
        oversampling_factor: 256,
        window,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        1.1,
        params,
        CHUNK_SIZE,
        planes.len(),
    )
    .map_err(|e| AudioError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); planes.len()];

    let mut pos = 0;
    while pos + CHUNK_SIZE <= frames {
        let chunk: Vec<&[f32]> = planes.iter().map(|p| &p[pos..pos + CHUNK_SIZE]).collect();
        let produced = resampler
            .process(chunk.as_slice(), None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        append(&mut output, produced);
        pos += CHUNK_SIZE;
    }

    if pos < frames {
        let tail: Vec<&[f32]> = planes.iter().map(|p| &p[pos..]).collect();
        let produced = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        append(&mut output, produced);
    }

    // Push zeros through until the delayed tail has come out.
    let mut flushes = 0;
    while output[0].len() < expected + delay && flushes < MAX_FLUSH_CALLS {
        let produced = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if produced.first().map_or(true, Vec::is_empty) {
            break;
        }
        append(&mut output, produced);
        flushes += 1;
    }

    for plane in &mut output {
        plane.drain(..delay.min(plane.len()));
        plane.resize(expected, 0.0);
    }
    Ok(output)
}

/// Resample a mono signal.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    let mut planes = resample_planes(vec![samples.to_vec()], from_rate, to_rate)?;
    Ok(planes.pop().unwrap_or_default())
}

fn append(output: &mut [Vec<f32>], produced: Vec<Vec<f32>>) {
    for (dst, src) in output.iter_mut().zip(produced) {
        dst.extend(src);
    }
}
