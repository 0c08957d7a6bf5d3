//! Capture service: level metering, pitch tracking and recording on a
//! processing thread fed by the input stream

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use ensemble_core::{EnsembleError, EstimatorConfig, PitchEstimate, PitchEstimator};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio_input::{AudioInputError, InputStream};

/// Detection runs on fixed-size blocks whatever the device buffer size
pub const CAPTURE_BLOCK: usize = 128;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Input error: {0}")]
    Input(#[from] AudioInputError),
    #[error("Estimator configuration rejected: {0}")]
    Config(#[from] EnsembleError),
    #[error("Failed to spawn capture thread: {0}")]
    Thread(#[from] std::io::Error),
    #[error("Capture already running")]
    AlreadyRunning,
    #[error("Capture not running")]
    NotRunning,
    #[error("Not recording")]
    NotRecording,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Pitch(PitchEstimate),
    /// Recording hit its length limit and stopped itself
    RecordingFull,
}

/// Lock-free input level for display
pub struct MeterState {
    peak_raw: AtomicU32,
    rms_raw: AtomicU32,
    clipped: AtomicBool,
}

impl MeterState {
    fn new() -> Self {
        Self {
            peak_raw: AtomicU32::new(0),
            rms_raw: AtomicU32::new(0),
            clipped: AtomicBool::new(false),
        }
    }

    /// Decaying peak hold
    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak_raw.load(Ordering::Relaxed))
    }

    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms_raw.load(Ordering::Relaxed))
    }

    /// Whether the input clipped since the last call; resets the flag
    pub fn take_clip(&self) -> bool {
        self.clipped.swap(false, Ordering::Relaxed)
    }

    fn update(&self, peak: f32, rms: f32) {
        self.peak_raw.store(peak.to_bits(), Ordering::Relaxed);
        self.rms_raw.store(rms.to_bits(), Ordering::Relaxed);
    }

    fn reset(&self) {
        self.update(0.0, 0.0);
    }
}

impl Default for MeterState {
    fn default() -> Self {
        Self::new()
    }
}

/// Finished mono recording
#[derive(Debug, Clone)]
pub struct RecordedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Recording state shared with the processing thread
struct Recorder {
    active: AtomicBool,
    /// Sample limit, 0 for unlimited
    limit: AtomicUsize,
    buffer: Mutex<Vec<f32>>,
}

impl Recorder {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            limit: AtomicUsize::new(0),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Append; returns true when this block filled the recording
    fn append(&self, block: &[f32]) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(mut buffer) = self.buffer.lock() else {
            return false;
        };
        let limit = self.limit.load(Ordering::SeqCst);
        if limit == 0 {
            buffer.extend_from_slice(block);
            return false;
        }
        let room = limit.saturating_sub(buffer.len());
        buffer.extend_from_slice(&block[..room.min(block.len())]);
        if buffer.len() >= limit {
            self.active.store(false, Ordering::SeqCst);
            return true;
        }
        false
    }
}

/// Per-block processing state owned by the capture thread
struct BlockProcessor {
    estimator: PitchEstimator,
    meter: Arc<MeterState>,
    recorder: Arc<Recorder>,
    pending: Vec<f32>,
    peak_hold: f32,
}

impl BlockProcessor {
    const PEAK_DECAY: f32 = 0.95;

    fn new(estimator: PitchEstimator, meter: Arc<MeterState>, recorder: Arc<Recorder>) -> Self {
        Self {
            estimator,
            meter,
            recorder,
            pending: Vec::with_capacity(CAPTURE_BLOCK * 2),
            peak_hold: 0.0,
        }
    }

    /// Process one device block of mono samples
    fn process(&mut self, mono: &[f32]) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        if mono.is_empty() {
            return events;
        }

        let current_peak = mono.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        self.peak_hold = f32::max(current_peak, self.peak_hold * Self::PEAK_DECAY);
        let rms = (mono.iter().map(|s| s * s).sum::<f32>() / mono.len() as f32).sqrt();
        self.meter.update(self.peak_hold, rms);
        if current_peak > 1.0 {
            self.meter.clipped.store(true, Ordering::Relaxed);
        }

        if self.recorder.append(mono) {
            events.push(CaptureEvent::RecordingFull);
        }

        self.pending.extend_from_slice(mono);
        let whole = self.pending.len() / CAPTURE_BLOCK * CAPTURE_BLOCK;
        for block in self.pending[..whole].chunks(CAPTURE_BLOCK) {
            if let Some(estimate) = self.estimator.push_block(block) {
                events.push(CaptureEvent::Pitch(estimate));
            }
        }
        self.pending.drain(..whole);
        events
    }
}

/// Owns the input stream and its processing thread
pub struct CaptureService {
    config: EstimatorConfig,
    meter: Arc<MeterState>,
    recorder: Arc<Recorder>,
    input: Option<InputStream>,
    worker: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl CaptureService {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            meter: Arc::new(MeterState::new()),
            recorder: Arc::new(Recorder::new()),
            input: None,
            worker: None,
            sample_rate: 0,
        }
    }

    pub fn meter(&self) -> Arc<MeterState> {
        self.meter.clone()
    }

    pub fn is_running(&self) -> bool {
        self.input.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.active.load(Ordering::SeqCst)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Open the device and start emitting events. Returns the capture rate.
    pub fn start(&mut self, device_id: &str, events: Sender<CaptureEvent>) -> Result<u32, CaptureError> {
        if self.input.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let (block_tx, block_rx) = bounded::<Vec<f32>>(64);
        let input = InputStream::open(device_id, block_tx)?;
        let sample_rate = input.sample_rate();

        let estimator = PitchEstimator::new(self.config, sample_rate)?;
        let processor = BlockProcessor::new(estimator, self.meter.clone(), self.recorder.clone());

        let worker = thread::Builder::new()
            .name("ensemble-capture".into())
            .spawn(move || Self::process_loop(block_rx, events, processor))?;

        self.sample_rate = sample_rate;
        self.input = Some(input);
        self.worker = Some(worker);

        info!(device = device_id, sample_rate, buffer = self.config.buffer_size, "Capture started");
        Ok(sample_rate)
    }

    pub fn stop(&mut self) -> Result<(), CaptureError> {
        self.recorder.active.store(false, Ordering::SeqCst);

        // Dropping the stream closes the block channel and ends the worker
        let input = self.input.take().ok_or(CaptureError::NotRunning)?;
        let dropped = input.dropped_blocks();
        drop(input);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        self.meter.reset();
        info!(dropped_blocks = dropped, "Capture stopped");
        Ok(())
    }

    /// Start recording; `max_samples` stops it automatically
    pub fn start_recording(&self, max_samples: Option<usize>) -> Result<(), CaptureError> {
        if !self.is_running() {
            return Err(CaptureError::NotRunning);
        }
        if let Ok(mut buffer) = self.recorder.buffer.lock() {
            buffer.clear();
        }
        self.recorder.limit.store(max_samples.unwrap_or(0), Ordering::SeqCst);
        self.recorder.active.store(true, Ordering::SeqCst);
        info!(max_samples, "Recording started");
        Ok(())
    }

    /// Take the recorded samples. Also valid after an automatic stop.
    pub fn stop_recording(&self) -> Result<RecordedAudio, CaptureError> {
        self.recorder.active.store(false, Ordering::SeqCst);

        let samples = self
            .recorder
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        if samples.is_empty() {
            return Err(CaptureError::NotRecording);
        }

        info!(samples = samples.len(), "Recording stopped");
        Ok(RecordedAudio {
            samples,
            sample_rate: self.sample_rate,
        })
    }

    fn process_loop(rx: Receiver<Vec<f32>>, events: Sender<CaptureEvent>, mut processor: BlockProcessor) {
        while let Ok(mono) = rx.recv() {
            for event in processor.process(&mono) {
                if events.try_send(event).is_err() {
                    debug!("Capture event dropped");
                }
            }
        }
        if !processor.pending.is_empty() {
            warn!(samples = processor.pending.len(), "Capture ended mid-block");
        }
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn processor() -> BlockProcessor {
        let estimator = PitchEstimator::new(EstimatorConfig::standard(), 44100).unwrap();
        BlockProcessor::new(estimator, Arc::new(MeterState::new()), Arc::new(Recorder::new()))
    }

    fn sine(freq: f32, start: usize, len: usize) -> Vec<f32> {
        (start..start + len).map(|i| (TAU * freq * i as f32 / 44100.0).sin() * 0.5).collect()
    }

    #[test]
    fn test_rechunks_device_blocks() {
        let mut processor = processor();
        let mut pitches = Vec::new();
        let mut offset = 0;
        // Odd device buffer size
        for _ in 0..40 {
            let block = sine(220.0, offset, 300);
            offset += 300;
            for event in processor.process(&block) {
                // Only once the ring holds a full window of signal
                match event {
                    CaptureEvent::Pitch(estimate) if estimate.timestamp_seconds >= 2048.0 / 44100.0 => {
                        pitches.push(estimate.frequency_hz);
                    }
                    _ => {}
                }
            }
        }
        assert!(!pitches.is_empty());
        assert!(pitches.iter().all(|f| (f - 220.0).abs() / 220.0 < 0.02));
        assert!(processor.pending.len() < CAPTURE_BLOCK);
        assert!(processor.meter.peak() > 0.45);
    }

    #[test]
    fn test_recording_limit() {
        let mut processor = processor();
        processor.recorder.limit.store(500, Ordering::SeqCst);
        processor.recorder.active.store(true, Ordering::SeqCst);

        let first = processor.process(&[0.1; 300]);
        assert!(!first.contains(&CaptureEvent::RecordingFull));
        let second = processor.process(&[0.1; 300]);
        assert!(second.contains(&CaptureEvent::RecordingFull));

        assert!(!processor.recorder.active.load(Ordering::SeqCst));
        assert_eq!(processor.recorder.buffer.lock().map(|b| b.len()).unwrap_or(0), 500);
    }

    #[test]
    fn test_silence_meters_zero() {
        let mut processor = processor();
        let events = processor.process(&[0.0; 4096]);
        assert!(events.is_empty());
        assert_eq!(processor.meter.rms(), 0.0);
    }

    #[test]
    fn test_clip_latches_until_read() {
        let mut processor = processor();
        processor.process(&[0.5; 256]);
        assert!(!processor.meter.take_clip());

        processor.process(&[1.2; 256]);
        processor.process(&[0.1; 256]);
        assert!(processor.meter.take_clip());
        assert!(!processor.meter.take_clip());
    }
}
