//! Musical clock shared by the looper and the metronome

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bar/beat grid derived from tempo and loop length
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopTimeline {
    /// Tempo in BPM
    pub bpm: f64,
    /// Time signature numerator
    pub beats_per_bar: u32,
    /// Loop length in bars
    pub total_bars: u32,
}

impl Default for LoopTimeline {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            beats_per_bar: 4,
            total_bars: 4,
        }
    }
}

impl LoopTimeline {
    pub fn new(bpm: f64, total_bars: u32) -> Self {
        Self {
            bpm,
            total_bars,
            ..Default::default()
        }
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn seconds_per_bar(&self) -> f64 {
        self.seconds_per_beat() * self.beats_per_bar as f64
    }

    /// Always derived from the current tempo and bar count
    pub fn loop_duration_secs(&self) -> f64 {
        self.seconds_per_bar() * self.total_bars as f64
    }

    /// 1-based bar within a loop that started at `loop_start`, clamped to the loop
    pub fn bar_at(&self, now: f64, loop_start: f64) -> u32 {
        let elapsed = now - loop_start;
        let bar = (elapsed / self.seconds_per_bar()).floor() as i64 + 1;
        bar.clamp(1, self.total_bars.max(1) as i64) as u32
    }

    /// Samples per beat at the given rate
    pub fn samples_per_beat(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 * self.seconds_per_beat()
    }
}

/// Look-ahead scheduling parameters shared by the looper and metronome
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookAhead {
    /// How far past `now` events are committed to the audio clock
    pub schedule_ahead_secs: f64,
    /// Timer period between ticks
    pub interval: Duration,
    /// Lead before the first loop iteration starts
    pub start_delay_secs: f64,
}

impl Default for LookAhead {
    fn default() -> Self {
        Self {
            schedule_ahead_secs: 0.1,
            interval: Duration::from_millis(25),
            start_delay_secs: 0.1,
        }
    }
}

impl LookAhead {
    /// True once `event_time` falls inside the scheduling window
    pub fn is_due(&self, now: f64, event_time: f64) -> bool {
        now + self.schedule_ahead_secs >= event_time
    }
}

/// A scheduler driven by periodic `tick(now)` calls against the audio clock
pub trait LookAheadScheduler {
    /// Side effects to apply to the audio engine
    type Event;

    /// Advance the scheduler to `now` (seconds on the audio clock)
    fn tick(&mut self, now: f64) -> Vec<Self::Event>;

    fn is_running(&self) -> bool;

    fn look_ahead(&self) -> &LookAhead;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations() {
        let timeline = LoopTimeline::new(120.0, 4);
        assert_eq!(timeline.seconds_per_beat(), 0.5);
        assert_eq!(timeline.seconds_per_bar(), 2.0);
        assert_eq!(timeline.loop_duration_secs(), 8.0);
        assert_eq!(timeline.samples_per_beat(48000), 24000.0);
    }

    #[test]
    fn test_bar_tracking() {
        let timeline = LoopTimeline::new(120.0, 4);
        assert_eq!(timeline.bar_at(10.0, 10.0), 1);
        assert_eq!(timeline.bar_at(11.99, 10.0), 1);
        assert_eq!(timeline.bar_at(12.0, 10.0), 2);
        assert_eq!(timeline.bar_at(17.5, 10.0), 4);
        // Clamped on both sides
        assert_eq!(timeline.bar_at(9.0, 10.0), 1);
        assert_eq!(timeline.bar_at(30.0, 10.0), 4);
    }

    #[test]
    fn test_look_ahead_window() {
        let look_ahead = LookAhead::default();
        assert!(look_ahead.is_due(7.9, 8.0));
        assert!(!look_ahead.is_due(7.85, 8.0));
    }
}
