//! Sample-rate conversion for recorded tracks

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("Resampler init error: {0}")]
    Init(#[from] rubato::ResamplerConstructionError),
    #[error("Resample error: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Convert mono `samples` from `from_rate` to `to_rate`.
///
/// The result is aligned to the input (filter delay removed) and holds
/// exactly `len * to_rate / from_rate` samples, rounded.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, ResampleError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)?;
    let delay = resampler.output_delay();

    let input = vec![samples.to_vec()];
    let mut output: Vec<f32> = resampler.process(&input, None)?.into_iter().flatten().collect();
    let tail = resampler.process_partial::<Vec<f32>>(None, None)?;
    output.extend(tail.into_iter().flatten());

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let mut aligned: Vec<f32> = output.into_iter().skip(delay).collect();
    aligned.resize(expected, 0.0);

    debug!(from_rate, to_rate, frames = expected, "Resampled");
    Ok(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_passes_through() {
        let samples = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&samples, 48000, 48000).unwrap(), samples);
        assert!(resample(&[], 44100, 48000).unwrap().is_empty());
    }

    #[test]
    fn test_length_follows_ratio() {
        let samples: Vec<f32> = (0..4410)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin() * 0.5)
            .collect();
        let up = resample(&samples, 44100, 48000).unwrap();
        assert_eq!(up.len(), 4800);
        // Mid-buffer energy survives conversion
        let peak = up[1000..3800].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.4 && peak < 0.6, "peak {peak}");
    }
}
