//! Metronome click voices

use std::f64::consts::TAU;

use ensemble_core::Click;

use crate::playback::secs_to_frame;

/// Level the click envelope decays to
const CLICK_FLOOR: f64 = 0.001;

#[derive(Debug, Clone)]
struct ScheduledClick {
    start_frame: u64,
    length_frames: u64,
    frequency_hz: f64,
    gain: f64,
}

impl ScheduledClick {
    fn sample_at(&self, frame: u64, sample_rate: f64) -> f32 {
        if frame < self.start_frame {
            return 0.0;
        }
        let age = frame - self.start_frame;
        if age >= self.length_frames {
            return 0.0;
        }
        // Exponential ramp from gain down to the floor over the click length
        let progress = age as f64 / self.length_frames as f64;
        let envelope = self.gain * (CLICK_FLOOR / self.gain).powf(progress);
        let t = age as f64 / sample_rate;
        ((TAU * self.frequency_hz * t).sin() * envelope) as f32
    }
}

/// Renders scheduled clicks on the engine clock
#[derive(Debug)]
pub struct ClickTrack {
    sample_rate: u32,
    clicks: Vec<ScheduledClick>,
}

impl ClickTrack {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clicks: Vec::new(),
        }
    }

    pub fn schedule(&mut self, click: &Click) {
        self.clicks.push(ScheduledClick {
            start_frame: secs_to_frame(click.time, self.sample_rate),
            length_frames: secs_to_frame(click.decay_secs, self.sample_rate).max(1),
            frequency_hz: click.frequency_hz as f64,
            gain: click.gain as f64,
        });
    }

    pub fn pending(&self) -> usize {
        self.clicks.len()
    }

    /// Drop every click, sounding or not
    pub fn clear(&mut self) {
        self.clicks.clear();
    }

    pub fn render(&mut self, out: &mut [f32], first_frame: u64) {
        let sample_rate = self.sample_rate as f64;
        for click in &self.clicks {
            for (i, sample) in out.iter_mut().enumerate() {
                *sample += click.sample_at(first_frame + i as u64, sample_rate);
            }
        }
        let end = first_frame + out.len() as u64;
        self.clicks.retain(|c| c.start_frame + c.length_frames > end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::metronome::{CLICK_DECAY_SECS, CLICK_GAIN, DOWNBEAT_HZ};

    fn click(time: f64) -> Click {
        Click {
            time,
            beat: 1,
            frequency_hz: DOWNBEAT_HZ,
            gain: CLICK_GAIN,
            decay_secs: CLICK_DECAY_SECS,
        }
    }

    #[test]
    fn test_click_decays_and_expires() {
        let mut track = ClickTrack::new(48000);
        track.schedule(&click(0.01));

        let mut out = vec![0.0; 4800];
        track.render(&mut out, 0);
        assert!(out[..480].iter().all(|s| *s == 0.0));

        let early = out[480..720].iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        let late = out[2880..3120].iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!(early > 0.1 && early <= CLICK_GAIN);
        assert!(late < early * 0.1);
        assert_eq!(track.pending(), 0);
    }

    #[test]
    fn test_click_spans_buffers() {
        let mut track = ClickTrack::new(48000);
        track.schedule(&click(0.0));
        let mut out = vec![0.0; 1024];
        track.render(&mut out, 0);
        assert_eq!(track.pending(), 1);
        track.clear();
        assert_eq!(track.pending(), 0);
    }
}
