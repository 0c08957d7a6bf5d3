//! Audio engine: harmony voices, loop playback and clicks on one output clock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

use crate::audio_io::{AudioOutputError, RealtimeOutputStream};
use crate::click::ClickTrack;
use crate::playback::PlaybackMixer;
use crate::synth::{SynthSettings, VoiceBank};

#[derive(Debug, Error)]
pub enum AudioEngineError {
    #[error("Audio output error: {0}")]
    Output(#[from] AudioOutputError),
    #[error("Engine already running")]
    AlreadyRunning,
    #[error("Engine not running")]
    NotRunning,
    #[error("Device runs at {device} Hz but the engine was built for {engine} Hz")]
    SampleRateMismatch { device: u32, engine: u32 },
}

/// State shared between the control side and the audio thread
pub struct EngineState {
    sample_rate: u32,
    /// Frames rendered since the engine was created; the engine clock
    frame: AtomicU64,
    /// Harmony voices, one slot per role
    pub voices: Mutex<VoiceBank>,
    /// Looping track sources
    pub playback: Mutex<PlaybackMixer>,
    /// Metronome clicks
    pub clicks: Mutex<ClickTrack>,
}

impl EngineState {
    pub fn new(sample_rate: u32, synth: SynthSettings) -> Self {
        Self {
            sample_rate,
            frame: AtomicU64::new(0),
            voices: Mutex::new(VoiceBank::new(synth, sample_rate)),
            playback: Mutex::new(PlaybackMixer::new(sample_rate)),
            clicks: Mutex::new(ClickTrack::new(sample_rate)),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::SeqCst)
    }

    /// Engine clock in seconds
    pub fn now(&self) -> f64 {
        self.frame() as f64 / self.sample_rate as f64
    }

    /// Render one interleaved buffer and advance the clock
    pub fn render(&self, buffer: &mut [f32], channels: u16) {
        let channels = channels.max(1) as usize;
        let num_frames = buffer.len() / channels;
        let first_frame = self.frame.load(Ordering::SeqCst);

        let mut mix = vec![0.0f32; num_frames];

        if let Ok(mut voices) = self.voices.lock() {
            voices.render(&mut mix);
        }
        if let Ok(mut playback) = self.playback.lock() {
            playback.render(&mut mix, first_frame);
        }
        if let Ok(mut clicks) = self.clicks.lock() {
            clicks.render(&mut mix, first_frame);
        }

        for (frame, sample) in buffer.chunks_mut(channels).zip(mix.iter()) {
            frame.fill(sample.clamp(-1.0, 1.0));
        }

        self.frame.fetch_add(num_frames as u64, Ordering::SeqCst);
    }
}

/// Owns the output stream and the shared engine state
pub struct AudioEngine {
    state: Arc<EngineState>,
    stream: Option<RealtimeOutputStream>,
}

impl AudioEngine {
    pub fn new(sample_rate: u32, synth: SynthSettings) -> Self {
        Self {
            state: Arc::new(EngineState::new(sample_rate, synth)),
            stream: None,
        }
    }

    pub fn state(&self) -> Arc<EngineState> {
        self.state.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.state.sample_rate()
    }

    pub fn now(&self) -> f64 {
        self.state.now()
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    pub fn start(&mut self) -> Result<(), AudioEngineError> {
        if self.stream.is_some() {
            return Err(AudioEngineError::AlreadyRunning);
        }

        let state = self.state.clone();
        let stream = RealtimeOutputStream::start(move |buffer, channels| {
            state.render(buffer, channels);
        })?;

        if stream.sample_rate() != self.state.sample_rate() {
            stream.stop();
            return Err(AudioEngineError::SampleRateMismatch {
                device: stream.sample_rate(),
                engine: self.state.sample_rate(),
            });
        }

        self.stream = Some(stream);
        info!(sample_rate = self.state.sample_rate(), "Audio engine started");
        Ok(())
    }

    /// Silence everything and close the stream
    pub fn stop(&mut self) -> Result<(), AudioEngineError> {
        let stream = self.stream.take().ok_or(AudioEngineError::NotRunning)?;
        self.stop_all_voices();
        self.with_playback(|p| p.stop_all());
        self.clear_clicks();
        stream.stop();
        info!("Audio engine stopped");
        Ok(())
    }

    pub fn with_voices<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut VoiceBank) -> R,
    {
        self.state.voices.lock().ok().map(|mut v| f(&mut v))
    }

    pub fn with_playback<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut PlaybackMixer) -> R,
    {
        self.state.playback.lock().ok().map(|mut p| f(&mut p))
    }

    pub fn stop_all_voices(&self) {
        self.with_voices(|v| v.stop_all());
    }

    pub fn clear_clicks(&self) {
        if let Ok(mut track) = self.state.clicks.lock() {
            track.clear();
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::{PlaybackCommand, SourceId, TrackId, VoiceRole};

    #[test]
    fn test_render_advances_clock() {
        let state = EngineState::new(100, SynthSettings::default());
        let mut buffer = vec![0.0; 2 * 50];
        state.render(&mut buffer, 2);
        assert_eq!(state.frame(), 50);
        assert!((state.now() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_playback_fans_out_to_channels() {
        let state = EngineState::new(10, SynthSettings::default());
        if let Ok(mut playback) = state.playback.lock() {
            playback.apply(PlaybackCommand::Start {
                source: SourceId(1),
                track_id: TrackId::from("track-1"),
                samples: vec![0.5; 10].into(),
                when: 0.2,
                loop_secs: 1.0,
                gain: 1.0,
            });
        }
        let mut buffer = vec![0.0; 8];
        state.render(&mut buffer, 2);
        assert_eq!(buffer, vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_stop_silences_voices() {
        let engine = AudioEngine::new(48000, SynthSettings::default());
        engine.with_voices(|v| v.render_voice(VoiceRole::Alto, 440.0));
        engine.stop_all_voices();
        let state = engine.state();
        let mut buffer = vec![0.0; 256];
        state.render(&mut buffer, 1);
        assert!(buffer.iter().all(|s| *s == 0.0));
    }
}
