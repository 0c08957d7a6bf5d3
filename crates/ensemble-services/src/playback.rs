//! Sample-accurate loop playback mixer

use std::sync::Arc;

use ensemble_core::{PlaybackCommand, SourceId};
use tracing::trace;

/// Seconds on the engine clock to a frame index
pub fn secs_to_frame(secs: f64, sample_rate: u32) -> u64 {
    (secs.max(0.0) * sample_rate as f64).round() as u64
}

#[derive(Debug, Clone)]
struct ActiveSource {
    source: SourceId,
    samples: Arc<[f32]>,
    start_frame: u64,
    loop_frames: u64,
    stop_frame: Option<u64>,
    gain: f32,
}

impl ActiveSource {
    /// Sample at an absolute frame. Tracks shorter than the loop are padded
    /// with silence, longer ones are cut at the loop end.
    fn sample_at(&self, frame: u64) -> Option<f32> {
        if frame < self.start_frame || self.stop_frame.is_some_and(|stop| frame >= stop) {
            return None;
        }
        let pos = (frame - self.start_frame) % self.loop_frames;
        Some(self.samples.get(pos as usize).copied().unwrap_or(0.0) * self.gain)
    }
}

/// Applies [`PlaybackCommand`]s and mixes every looping source
#[derive(Debug)]
pub struct PlaybackMixer {
    sample_rate: u32,
    sources: Vec<ActiveSource>,
}

impl PlaybackMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            sources: Vec::new(),
        }
    }

    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn apply(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Start {
                source,
                samples,
                when,
                loop_secs,
                gain,
                ..
            } => {
                let loop_frames = secs_to_frame(loop_secs, self.sample_rate).max(1);
                self.sources.push(ActiveSource {
                    source,
                    samples,
                    start_frame: secs_to_frame(when, self.sample_rate),
                    loop_frames,
                    stop_frame: None,
                    gain,
                });
            }
            PlaybackCommand::Stop { source, at: None } => {
                self.sources.retain(|s| s.source != source);
            }
            PlaybackCommand::Stop { source, at: Some(at) } => {
                let stop_frame = secs_to_frame(at, self.sample_rate);
                match self.sources.iter_mut().find(|s| s.source == source) {
                    Some(active) => active.stop_frame = Some(stop_frame),
                    // Already gone
                    None => trace!(source = source.0, "Stop for unknown source"),
                }
            }
            PlaybackCommand::SetGain { source, gain } => {
                if let Some(active) = self.sources.iter_mut().find(|s| s.source == source) {
                    active.gain = gain;
                }
            }
        }
    }

    pub fn apply_all(&mut self, commands: impl IntoIterator<Item = PlaybackCommand>) {
        for command in commands {
            self.apply(command);
        }
    }

    /// Add every source into `out`, where `out[0]` is `first_frame`
    pub fn render(&mut self, out: &mut [f32], first_frame: u64) {
        for source in &self.sources {
            for (i, sample) in out.iter_mut().enumerate() {
                if let Some(value) = source.sample_at(first_frame + i as u64) {
                    *sample += value;
                }
            }
        }

        let end = first_frame + out.len() as u64;
        self.sources.retain(|s| s.stop_frame.is_none_or(|stop| stop > end));
    }

    pub fn stop_all(&mut self) {
        self.sources.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::TrackId;

    fn start(source: u64, samples: Vec<f32>, when: f64, loop_secs: f64) -> PlaybackCommand {
        PlaybackCommand::Start {
            source: SourceId(source),
            track_id: TrackId::from("track-1"),
            samples: samples.into(),
            when,
            loop_secs,
            gain: 1.0,
        }
    }

    #[test]
    fn test_starts_on_exact_frame() {
        // 10 Hz clock keeps frame math readable
        let mut mixer = PlaybackMixer::new(10);
        mixer.apply(start(1, vec![1.0, 2.0, 3.0], 0.5, 0.4));

        let mut out = vec![0.0; 12];
        mixer.render(&mut out, 0);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_scheduled_stop_and_handover() {
        let mut mixer = PlaybackMixer::new(10);
        mixer.apply(start(1, vec![1.0; 4], 0.0, 0.4));
        mixer.apply(PlaybackCommand::Stop { source: SourceId(1), at: Some(0.8) });
        mixer.apply(start(2, vec![5.0; 4], 0.8, 0.4));

        let mut out = vec![0.0; 12];
        mixer.render(&mut out, 0);
        assert_eq!(&out[..8], &[1.0; 8]);
        assert_eq!(&out[8..], &[5.0; 4]);
        assert_eq!(mixer.active_sources(), 1);
    }

    #[test]
    fn test_gain_and_unknown_stop() {
        let mut mixer = PlaybackMixer::new(10);
        mixer.apply(start(1, vec![1.0; 4], 0.0, 0.4));
        mixer.apply(PlaybackCommand::SetGain { source: SourceId(1), gain: 0.0 });
        mixer.apply(PlaybackCommand::Stop { source: SourceId(9), at: None });
        mixer.apply(PlaybackCommand::Stop { source: SourceId(9), at: Some(1.0) });

        let mut out = vec![0.0; 4];
        mixer.render(&mut out, 0);
        assert!(out.iter().all(|s| *s == 0.0));

        mixer.apply(PlaybackCommand::Stop { source: SourceId(1), at: None });
        assert_eq!(mixer.active_sources(), 0);
    }
}
