//! Metronome: one click per beat on the shared timeline

use crate::error::{EnsembleError, Result};
use crate::timeline::{LookAhead, LookAheadScheduler, LoopTimeline};

pub const DOWNBEAT_HZ: f32 = 1000.0;
pub const BEAT_HZ: f32 = 800.0;
pub const CLICK_GAIN: f32 = 0.3;
/// Time for a click to decay to silence (0.001)
pub const CLICK_DECAY_SECS: f64 = 0.05;

/// A click scheduled on the audio clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Click {
    pub time: f64,
    /// 1-based beat within the bar
    pub beat: u32,
    pub frequency_hz: f32,
    pub gain: f32,
    pub decay_secs: f64,
}

impl Click {
    fn on_beat(time: f64, beat: u32) -> Self {
        Self {
            time,
            beat,
            frequency_hz: if beat == 1 { DOWNBEAT_HZ } else { BEAT_HZ },
            gain: CLICK_GAIN,
            decay_secs: CLICK_DECAY_SECS,
        }
    }
}

pub struct MetronomeScheduler {
    timeline: LoopTimeline,
    look_ahead: LookAhead,
    running: bool,
    next_click_time: f64,
    beat: u32,
}

impl MetronomeScheduler {
    pub fn new(timeline: LoopTimeline, look_ahead: LookAhead) -> Self {
        Self {
            timeline,
            look_ahead,
            running: false,
            next_click_time: 0.0,
            beat: 1,
        }
    }

    /// First click lands on `now`
    pub fn start(&mut self, now: f64) {
        self.running = true;
        self.next_click_time = now;
        self.beat = 1;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Start or stop; returns the new running state
    pub fn toggle(&mut self, now: f64) -> bool {
        if self.running {
            self.stop();
        } else {
            self.start(now);
        }
        self.running
    }

    /// Takes effect from the click after the ones already scheduled
    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(EnsembleError::InvalidConfiguration(format!("bpm must be positive, got {bpm}")));
        }
        self.timeline.bpm = bpm;
        Ok(())
    }

    pub fn bpm(&self) -> f64 {
        self.timeline.bpm
    }

    pub fn next_click_time(&self) -> f64 {
        self.next_click_time
    }
}

impl LookAheadScheduler for MetronomeScheduler {
    type Event = Click;

    fn tick(&mut self, now: f64) -> Vec<Click> {
        let mut clicks = Vec::new();
        while self.running && self.look_ahead.is_due(now, self.next_click_time) {
            clicks.push(Click::on_beat(self.next_click_time, self.beat));
            self.next_click_time += self.timeline.seconds_per_beat();
            self.beat = self.beat % self.timeline.beats_per_bar.max(1) + 1;
        }
        clicks
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn look_ahead(&self) -> &LookAhead {
        &self.look_ahead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metronome() -> MetronomeScheduler {
        MetronomeScheduler::new(LoopTimeline::new(120.0, 4), LookAhead::default())
    }

    fn run(metronome: &mut MetronomeScheduler, until: f64) -> Vec<Click> {
        let mut clicks = Vec::new();
        let mut i = 0;
        loop {
            let now = i as f64 * 0.025;
            if now > until {
                break;
            }
            clicks.extend(metronome.tick(now));
            i += 1;
        }
        clicks
    }

    #[test]
    fn test_downbeat_accent() {
        let mut metronome = metronome();
        metronome.start(0.0);
        let clicks = run(&mut metronome, 2.0);

        let beats: Vec<u32> = clicks.iter().map(|c| c.beat).collect();
        assert_eq!(beats, vec![1, 2, 3, 4, 1]);
        assert_eq!(clicks[0].frequency_hz, DOWNBEAT_HZ);
        assert_eq!(clicks[1].frequency_hz, BEAT_HZ);
        assert_eq!(clicks[4].frequency_hz, DOWNBEAT_HZ);
        for (i, click) in clicks.iter().enumerate() {
            assert!((click.time - i as f64 * 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_bpm_change_not_retroactive() {
        let mut metronome = metronome();
        metronome.start(0.0);
        assert_eq!(metronome.tick(0.0).len(), 1);
        assert_eq!(metronome.next_click_time(), 0.5);

        metronome.set_bpm(60.0).unwrap();
        assert_eq!(metronome.next_click_time(), 0.5);
        let clicks = metronome.tick(0.45);
        assert_eq!(clicks[0].time, 0.5);
        assert_eq!(metronome.next_click_time(), 1.5);
    }

    #[test]
    fn test_stop_and_toggle() {
        let mut metronome = metronome();
        assert!(metronome.toggle(1.0));
        assert_eq!(metronome.tick(1.0).len(), 1);
        assert!(!metronome.toggle(1.2));
        assert!(metronome.tick(5.0).is_empty());
        assert!(metronome.set_bpm(-1.0).is_err());
    }
}
