//! Monophonic pitch estimation (YIN family)
//!
//! The estimator keeps a ring buffer of the most recent `buffer_size` samples
//! and runs the detector every `hop_blocks` incoming blocks. Silence, noise and
//! out-of-range periods produce no estimate rather than a zero pitch.

use serde::{Deserialize, Serialize};

use crate::error::{EnsembleError, Result};
use crate::note::NoteEvent;

/// How the absolute-threshold search picks the period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DipSearch {
    /// Compute the full difference function, then walk down the first dip
    /// below threshold to its local minimum.
    #[default]
    Refine,
    /// Compute the difference function lazily and stop as soon as the first
    /// dip below threshold bottoms out. Lags past the dip are never computed.
    EarlyExit,
}

/// Estimator configuration, validated once at construction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Analysis window in samples (power of two)
    pub buffer_size: usize,
    /// Run detection every N pushed blocks
    pub hop_blocks: u32,
    /// Absolute threshold on the normalized difference
    pub threshold: f32,
    /// Minimum confidence for an estimate to be reported
    pub probability_floor: f32,
    /// Minimum RMS for the buffer to be considered voiced
    pub silence_floor: f32,
    pub min_hz: f32,
    pub max_hz: f32,
    pub dip_search: DipSearch,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl EstimatorConfig {
    pub fn standard() -> Self {
        Self {
            buffer_size: 2048,
            hop_blocks: 4,
            threshold: 0.15,
            probability_floor: 0.1,
            silence_floor: 0.01,
            min_hz: 50.0,
            max_hz: 2000.0,
            dip_search: DipSearch::Refine,
        }
    }

    /// Smaller window, detection every other block, first-dip exit
    pub fn low_latency() -> Self {
        Self {
            buffer_size: 1024,
            hop_blocks: 2,
            dip_search: DipSearch::EarlyExit,
            ..Self::standard()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < 64 || !self.buffer_size.is_power_of_two() {
            return Err(EnsembleError::InvalidConfiguration(format!(
                "buffer size {} must be a power of two >= 64",
                self.buffer_size
            )));
        }
        if self.hop_blocks == 0 {
            return Err(EnsembleError::InvalidConfiguration("hop_blocks must be at least 1".into()));
        }
        for (name, value) in [("threshold", self.threshold), ("probability_floor", self.probability_floor)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(EnsembleError::InvalidConfiguration(format!("{name} {value} outside (0, 1)")));
            }
        }
        if !(self.min_hz > 0.0 && self.min_hz < self.max_hz) {
            return Err(EnsembleError::InvalidConfiguration(format!(
                "frequency range {}..{} Hz is empty",
                self.min_hz, self.max_hz
            )));
        }
        Ok(())
    }
}

/// One voiced-frame estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    pub frequency_hz: f64,
    /// 1 - normalized difference at the chosen lag, in [0, 1]
    pub confidence: f32,
    /// Stream time of the newest sample in the analysed window
    pub timestamp_seconds: f64,
}

impl PitchEstimate {
    pub fn note(&self) -> Option<NoteEvent> {
        NoteEvent::from_frequency(self.frequency_hz)
    }
}

/// Streaming pitch estimator over a ring buffer
#[derive(Debug, Clone)]
pub struct PitchEstimator {
    config: EstimatorConfig,
    sample_rate: f32,
    ring: Vec<f32>,
    write_pos: usize,
    /// Linearized copy of the ring, oldest sample first
    frame: Vec<f32>,
    /// Normalized difference function d'(tau), tau in [0, N/2)
    yin: Vec<f32>,
    blocks_seen: u64,
    samples_seen: u64,
}

impl PitchEstimator {
    pub fn new(config: EstimatorConfig, sample_rate: u32) -> Result<Self> {
        config.validate()?;
        if sample_rate == 0 {
            return Err(EnsembleError::InvalidConfiguration("sample rate must be positive".into()));
        }
        let n = config.buffer_size;
        Ok(Self {
            config,
            sample_rate: sample_rate as f32,
            ring: vec![0.0; n],
            write_pos: 0,
            frame: vec![0.0; n],
            yin: vec![0.0; n / 2],
            blocks_seen: 0,
            samples_seen: 0,
        })
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate as u32
    }

    /// Lowest pitch whose period fits inside the lag range, or `min_hz` if higher
    fn lowest_hz(&self) -> f64 {
        let longest_lag = (self.yin.len() - 2) as f64;
        (self.config.min_hz as f64).max(self.sample_rate as f64 / longest_lag)
    }

    /// Push one block of mono samples; runs detection on every `hop_blocks`-th block
    pub fn push_block(&mut self, block: &[f32]) -> Option<PitchEstimate> {
        let n = self.ring.len();
        for &sample in block {
            self.ring[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % n;
        }
        self.samples_seen += block.len() as u64;
        self.blocks_seen += 1;

        if self.blocks_seen % self.config.hop_blocks as u64 != 0 {
            return None;
        }
        self.estimate()
    }

    /// Run detection on the current ring contents
    pub fn estimate(&mut self) -> Option<PitchEstimate> {
        let n = self.ring.len();
        let (newest, oldest) = self.ring.split_at(self.write_pos);
        self.frame[..oldest.len()].copy_from_slice(oldest);
        self.frame[oldest.len()..].copy_from_slice(newest);

        let mean_square = self.frame.iter().map(|s| (*s as f64) * (*s as f64)).sum::<f64>() / n as f64;
        if (mean_square.sqrt() as f32) < self.config.silence_floor {
            return None;
        }

        let (tau, dip) = match self.config.dip_search {
            DipSearch::Refine => self.search_refined()?,
            DipSearch::EarlyExit => self.search_early_exit()?,
        };

        let confidence = (1.0 - dip).clamp(0.0, 1.0);
        if confidence < self.config.probability_floor {
            return None;
        }

        let refined = self.parabolic_interpolation(tau);
        let frequency_hz = self.sample_rate as f64 / refined;
        if !(self.lowest_hz()..=self.config.max_hz as f64).contains(&frequency_hz) {
            return None;
        }

        Some(PitchEstimate {
            frequency_hz,
            confidence,
            timestamp_seconds: self.samples_seen as f64 / self.sample_rate as f64,
        })
    }

    /// Squared difference d(tau) over a half-buffer window
    fn difference(&self, tau: usize) -> f64 {
        let w = self.yin.len();
        self.frame[..w]
            .iter()
            .zip(&self.frame[tau..tau + w])
            .map(|(a, b)| {
                let delta = (*a - *b) as f64;
                delta * delta
            })
            .sum()
    }

    /// d'(tau) = d(tau) * tau / sum(d(1..=tau)), advancing the running sum
    fn accumulate_normalized(&self, tau: usize, running_sum: &mut f64) -> f32 {
        let d = self.difference(tau);
        *running_sum += d;
        if *running_sum > 0.0 { (d * tau as f64 / *running_sum) as f32 } else { 1.0 }
    }

    fn search_refined(&mut self) -> Option<(usize, f32)> {
        let half = self.yin.len();
        self.yin[0] = 1.0;
        let mut running_sum = 0.0f64;
        for tau in 1..half {
            let normalized = self.accumulate_normalized(tau, &mut running_sum);
            self.yin[tau] = normalized;
        }

        let threshold = self.config.threshold;
        let mut tau = 2;
        while tau < half - 1 {
            if self.yin[tau] < threshold {
                while tau + 1 < half && self.yin[tau + 1] < self.yin[tau] {
                    tau += 1;
                }
                // Still falling at the last lag: the period is longer than the window
                if tau + 1 >= half {
                    return None;
                }
                return Some((tau, self.yin[tau]));
            }
            tau += 1;
        }
        None
    }

    fn search_early_exit(&mut self) -> Option<(usize, f32)> {
        let half = self.yin.len();
        self.yin[0] = 1.0;
        let threshold = self.config.threshold;
        let mut running_sum = 0.0f64;

        let mut tau = 1;
        while tau < half - 1 {
            let normalized = self.accumulate_normalized(tau, &mut running_sum);
            self.yin[tau] = normalized;
            if tau >= 2 && normalized < threshold {
                // Walk the dip, computing only the lags it spans
                while tau + 1 < half {
                    let next = self.accumulate_normalized(tau + 1, &mut running_sum);
                    self.yin[tau + 1] = next;
                    if next >= self.yin[tau] {
                        break;
                    }
                    tau += 1;
                }
                if tau + 1 >= half {
                    return None;
                }
                return Some((tau, self.yin[tau]));
            }
            tau += 1;
        }
        None
    }

    /// Sub-sample lag from a parabola through d'(tau-1), d'(tau), d'(tau+1)
    fn parabolic_interpolation(&self, tau: usize) -> f64 {
        let half = self.yin.len();
        if tau < 1 || tau + 1 >= half {
            return tau as f64;
        }
        let s0 = self.yin[tau - 1] as f64;
        let s1 = self.yin[tau] as f64;
        let s2 = self.yin[tau + 1] as f64;
        let denom = 2.0 * (2.0 * s1 - s2 - s0);
        if denom.abs() < f64::EPSILON {
            return tau as f64;
        }
        let shift = (s2 - s0) / denom;
        // The vertex of a genuine minimum sits within one sample of it
        if shift.abs() > 1.0 {
            return tau as f64;
        }
        tau as f64 + shift
    }
}
