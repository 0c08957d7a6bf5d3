//! WAV export of tracks and loop mixdowns (16-bit PCM, mono)

use std::path::Path;

use ensemble_core::Track;
use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;
use tracing::info;

use crate::resample::{resample, ResampleError};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("WAV write error: {0}")]
    Wav(#[from] hound::Error),
    #[error(transparent)]
    Resample(#[from] ResampleError),
    #[error("Nothing to export")]
    Empty,
}

pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), ExportError> {
    if samples.is_empty() {
        return Err(ExportError::Empty);
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;

    info!(path = %path.display(), frames = samples.len(), sample_rate, "Exported WAV");
    Ok(())
}

pub fn export_track(path: &Path, track: &Track) -> Result<(), ExportError> {
    write_wav(path, &track.samples, track.sample_rate)
}

/// Sum tracks at `sample_rate`, each cut or padded to `loop_frames`
pub fn mixdown<'a>(
    tracks: impl IntoIterator<Item = &'a Track>,
    sample_rate: u32,
    loop_frames: usize,
) -> Result<Vec<f32>, ExportError> {
    let mut mix = vec![0.0f32; loop_frames];
    for track in tracks {
        let samples = resample(&track.samples, track.sample_rate, sample_rate)?;
        for (out, sample) in mix.iter_mut().zip(samples.iter()) {
            *out += sample;
        }
    }
    for sample in &mut mix {
        *sample = sample.clamp(-1.0, 1.0);
    }
    Ok(mix)
}

pub fn export_mix<'a>(
    path: &Path,
    tracks: impl IntoIterator<Item = &'a Track>,
    sample_rate: u32,
    loop_frames: usize,
) -> Result<(), ExportError> {
    let mix = mixdown(tracks, sample_rate, loop_frames)?;
    write_wav(path, &mix, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::TrackId;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ensemble-{}-{}.wav", name, std::process::id()))
    }

    #[test]
    fn test_export_track() {
        let track = Track::new(TrackId::from("track-1"), "Track 1", vec![0.0, 0.5, -0.5, 1.5], 8000, 0);
        let path = temp_path("track");
        export_track(&path, &track).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 16383, -16383, i16::MAX]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_mixdown_pads_and_sums() {
        let a = Track::new(TrackId::from("track-1"), "Track 1", vec![0.25; 6], 100, 0);
        let b = Track::new(TrackId::from("track-2"), "Track 2", vec![0.5; 2], 100, 0);
        let mix = mixdown([&a, &b], 100, 4).unwrap();
        assert_eq!(mix, vec![0.75, 0.75, 0.25, 0.25]);
    }

    #[test]
    fn test_empty_export_rejected() {
        let path = temp_path("empty");
        assert!(matches!(write_wav(&path, &[], 48000), Err(ExportError::Empty)));
    }
}
