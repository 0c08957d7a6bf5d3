//! Session: wires capture, harmony, synthesis, MIDI, looping and persistence
//! around one audio engine

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use ensemble_core::{
    EnsembleError, Harmony, HarmonyPipeline, HarmonySettings, HarmonyUpdate, LookAhead, LoopTimeline, NoteEvent,
    NoteSource, Track, TrackHistory, TrackId, VoiceRole, Vowel,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio_engine::{AudioEngine, AudioEngineError, EngineState};
use crate::audio_io::{default_output_device, AudioOutputError};
use crate::capture::{CaptureError, CaptureEvent, CaptureService, MeterState, RecordedAudio};
use crate::config::{save_config_to, EnsembleConfig};
use crate::export::{export_mix, export_track, ExportError};
use crate::midi::{HarmonyMidiOutput, MidiError, MidiNoteInput};
use crate::resample::{resample, ResampleError};
use crate::synth::SynthMode;
use crate::transport::{LooperService, MetronomeService};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] AudioEngineError),
    #[error(transparent)]
    Output(#[from] AudioOutputError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Midi(#[from] MidiError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Resample(#[from] ResampleError),
    #[error(transparent)]
    Core(#[from] EnsembleError),
    #[error("Failed to spawn harmony thread: {0}")]
    Thread(#[from] std::io::Error),
    #[error("Session not started")]
    NotStarted,
}

/// Notifications for the front end
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The sounding harmony changed
    Harmony(HarmonyUpdate),
    /// Recording reached the loop length
    RecordingFull,
    TrackRecorded { id: TrackId, duration_secs: f64 },
}

// ============================================================================
// Harmony routing
// ============================================================================

/// Turns estimates and MIDI notes into sounding harmonies
struct HarmonyRouter {
    pipeline: Arc<Mutex<HarmonyPipeline>>,
    engine: Arc<EngineState>,
    midi_out: Arc<Mutex<Option<HarmonyMidiOutput>>>,
    events: Sender<SessionEvent>,
    sounding: Option<Harmony>,
}

impl HarmonyRouter {
    fn on_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Pitch(estimate) => {
                let update = self.pipeline.lock().ok().and_then(|mut p| p.on_estimate(&estimate));
                if let Some(update) = update {
                    self.apply(update);
                }
            }
            CaptureEvent::RecordingFull => {
                let _ = self.events.try_send(SessionEvent::RecordingFull);
            }
        }
    }

    fn on_note(&mut self, note: NoteEvent) {
        let update = self.pipeline.lock().ok().map(|mut p| p.on_note(note, NoteSource::Midi));
        if let Some(update) = update {
            self.apply(update);
        }
    }

    /// Re-synthesize only when the harmony changes or the voices were silenced
    fn apply(&mut self, update: HarmonyUpdate) {
        let Ok(mut voices) = self.engine.voices.lock() else {
            return;
        };
        if self.sounding == Some(update.harmony) && voices.active_count() > 0 {
            return;
        }
        voices.render_harmony(&update.harmony);
        drop(voices);
        self.sounding = Some(update.harmony);

        if let Ok(out) = self.midi_out.lock() {
            if let Some(Err(e)) = out.as_ref().map(|out| out.send_harmony(&update.harmony)) {
                debug!("MIDI harmony not sent: {}", e);
            }
        }

        debug!(
            note = %update.quantized.name(),
            midi = ?update.harmony.midi_numbers(),
            "Harmony"
        );
        let _ = self.events.try_send(SessionEvent::Harmony(update));
    }

    fn run(mut self, capture: Receiver<CaptureEvent>, notes: Receiver<NoteEvent>, cancel: Receiver<()>) {
        loop {
            let running = select! {
                recv(capture) -> event => event.map(|event| self.on_capture(event)).is_ok(),
                recv(notes) -> note => note.map(|note| self.on_note(note)).is_ok(),
                recv(cancel) -> _ => false,
            };
            if !running {
                break;
            }
        }
        debug!("Harmony router stopped");
    }
}

struct RouterHandle {
    cancel: Sender<()>,
    thread: JoinHandle<()>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    config: EnsembleConfig,
    config_path: Option<PathBuf>,
    engine: AudioEngine,
    capture: CaptureService,
    pipeline: Arc<Mutex<HarmonyPipeline>>,
    history: TrackHistory,
    looper: LooperService,
    metronome: MetronomeService,
    midi_in: Option<MidiNoteInput>,
    midi_out: Arc<Mutex<Option<HarmonyMidiOutput>>>,
    notes_tx: Sender<NoteEvent>,
    notes_rx: Receiver<NoteEvent>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    router: Option<RouterHandle>,
}

impl Session {
    /// Session rendering at the default output device's rate
    pub fn open(config: EnsembleConfig) -> Result<Self, SessionError> {
        let device = default_output_device()?;
        info!(device = %device.name, sample_rate = device.sample_rate, "Output device");
        Ok(Self::new(config, device.sample_rate))
    }

    /// Device-free construction; nothing is opened until [`Session::start`]
    pub fn new(config: EnsembleConfig, sample_rate: u32) -> Self {
        let engine = AudioEngine::new(sample_rate, config.synth);
        let timeline = config.timeline();
        let look_ahead = LookAhead::default();
        let pipeline = HarmonyPipeline::new(config.harmony).with_confidence_gate(config.confidence_gate);
        let (notes_tx, notes_rx) = bounded(64);
        let (events_tx, events_rx) = unbounded();

        Self {
            capture: CaptureService::new(config.estimator.config()),
            looper: LooperService::new(engine.state(), timeline, look_ahead),
            metronome: MetronomeService::new(engine.state(), timeline, look_ahead),
            pipeline: Arc::new(Mutex::new(pipeline)),
            history: TrackHistory::new(),
            midi_in: None,
            midi_out: Arc::new(Mutex::new(None)),
            config_path: None,
            engine,
            config,
            notes_tx,
            notes_rx,
            events_tx,
            events_rx,
            router: None,
        }
    }

    /// Persist settings changes to `path`
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate()
    }

    pub fn is_started(&self) -> bool {
        self.router.is_some()
    }

    /// Open output, capture and any configured MIDI ports
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.router.is_some() {
            return Ok(());
        }
        self.engine.start()?;

        let (capture_tx, capture_rx) = bounded(256);
        let device = self.config.input_device.clone().unwrap_or_else(|| "default".to_string());
        if let Err(e) = self.capture.start(&device, capture_tx) {
            let _ = self.engine.stop();
            return Err(e.into());
        }

        let router = HarmonyRouter {
            pipeline: self.pipeline.clone(),
            engine: self.engine.state(),
            midi_out: self.midi_out.clone(),
            events: self.events_tx.clone(),
            sounding: None,
        };
        let notes = self.notes_rx.clone();
        let (cancel_tx, cancel_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name("ensemble-harmony".into())
            .spawn(move || router.run(capture_rx, notes, cancel_rx))?;
        self.router = Some(RouterHandle {
            cancel: cancel_tx,
            thread,
        });

        if let Some(port) = self.config.midi_input.clone() {
            if let Err(e) = self.connect_midi_input(&port) {
                warn!(port = %port, "MIDI input unavailable: {}", e);
            }
        }
        if let Some(port) = self.config.midi_output.clone() {
            if let Err(e) = self.connect_midi_output(&port) {
                warn!(port = %port, "MIDI output unavailable: {}", e);
            }
        }

        info!("Session started");
        Ok(())
    }

    /// Stop everything; no voice or loop keeps sounding after this returns
    pub fn stop(&mut self) {
        self.looper.stop();
        self.metronome.stop();
        if let Some(router) = self.router.take() {
            let _ = router.cancel.send(());
            let _ = router.thread.join();
        }
        if self.capture.is_running() {
            let _ = self.capture.stop();
        }
        self.midi_in = None;
        if let Ok(mut out) = self.midi_out.lock() {
            out.take();
        }
        if self.engine.is_running() {
            let _ = self.engine.stop();
        }
        info!("Session stopped");
    }

    /// Drain pending notifications, finishing auto-stopped recordings
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            if event == SessionEvent::RecordingFull {
                match self.stop_recording() {
                    Ok(recorded) => events.push(recorded),
                    Err(e) => warn!("Failed to finish recording: {}", e),
                }
                continue;
            }
            events.push(event);
        }
        events
    }

    pub fn meter(&self) -> Arc<MeterState> {
        self.capture.meter()
    }

    // ========================================================================
    // Harmony and voices
    // ========================================================================

    /// Play a note through the harmony path, as if it came from MIDI
    pub fn play_note(&self, note: NoteEvent) {
        if self.notes_tx.try_send(note).is_err() {
            debug!("Note dropped");
        }
    }

    pub fn harmony_settings(&self) -> HarmonySettings {
        self.config.harmony
    }

    pub fn set_harmony_settings(&mut self, settings: HarmonySettings) {
        if let Ok(mut pipeline) = self.pipeline.lock() {
            pipeline.set_settings(settings);
        }
        self.config.harmony = settings;
        self.persist();
    }

    pub fn last_harmony(&self) -> Option<HarmonyUpdate> {
        self.pipeline.lock().ok().and_then(|p| p.last().copied())
    }

    pub fn silence(&self) {
        self.engine.stop_all_voices();
    }

    pub fn set_volume(&mut self, role: VoiceRole, volume: f32) {
        self.engine.with_voices(|v| v.set_volume(role, volume));
        self.config.synth.volumes.set(role, volume);
        self.persist();
    }

    pub fn set_mode(&mut self, mode: SynthMode) {
        self.engine.with_voices(|v| v.set_mode(mode));
        self.config.synth.mode = mode;
        self.persist();
    }

    pub fn set_vowel(&mut self, vowel: Vowel) {
        self.engine.with_voices(|v| v.set_vowel(vowel));
        self.config.synth.vowel = vowel;
        self.persist();
    }

    // ========================================================================
    // MIDI
    // ========================================================================

    pub fn connect_midi_input(&mut self, port: &str) -> Result<(), SessionError> {
        self.midi_in = None;
        let input = MidiNoteInput::connect(port, self.notes_tx.clone())?;
        self.config.midi_input = Some(input.port_name().to_string());
        self.midi_in = Some(input);
        self.persist();
        Ok(())
    }

    pub fn connect_midi_output(&mut self, port: &str) -> Result<(), SessionError> {
        let output = HarmonyMidiOutput::connect(port)?;
        self.config.midi_output = Some(output.port_name().to_string());
        if let Ok(mut slot) = self.midi_out.lock() {
            *slot = Some(output);
        }
        self.persist();
        Ok(())
    }

    // ========================================================================
    // Transport
    // ========================================================================

    pub fn timeline(&self) -> LoopTimeline {
        self.looper.with_scheduler(|s| *s.timeline()).unwrap_or_else(|| self.config.timeline())
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), SessionError> {
        self.looper.with_scheduler(|s| s.set_bpm(bpm)).transpose()?;
        self.metronome.with_scheduler(|s| s.set_bpm(bpm)).transpose()?;
        self.config.bpm = bpm;
        self.persist();
        Ok(())
    }

    pub fn set_total_bars(&mut self, bars: u32) -> Result<(), SessionError> {
        self.looper.with_scheduler(|s| s.set_total_bars(bars)).transpose()?;
        self.config.total_bars = bars;
        self.persist();
        Ok(())
    }

    /// Returns false when there are no tracks
    pub fn play(&mut self) -> bool {
        let tracks = self.history.tracks().to_vec();
        self.looper.start(&tracks)
    }

    pub fn stop_playback(&mut self) {
        self.looper.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.looper.is_playing()
    }

    pub fn current_bar(&self) -> u32 {
        self.looper.current_bar()
    }

    pub fn toggle_metronome(&mut self) -> bool {
        self.metronome.toggle()
    }

    pub fn toggle_mute(&self, id: &TrackId) {
        self.looper.toggle_mute(id);
    }

    pub fn toggle_solo(&self, id: &TrackId) {
        self.looper.toggle_solo(id);
    }

    pub fn is_audible(&self, id: &TrackId) -> bool {
        self.looper.is_audible(id)
    }

    pub fn is_muted(&self, id: &TrackId) -> bool {
        self.looper.is_muted(id)
    }

    pub fn is_soloed(&self, id: &TrackId) -> bool {
        self.looper.is_soloed(id)
    }

    // ========================================================================
    // Recording and tracks
    // ========================================================================

    pub fn is_recording(&self) -> bool {
        self.capture.is_recording()
    }

    /// Record one loop's worth of input, overdubbing over existing tracks
    pub fn start_recording(&mut self) -> Result<(), SessionError> {
        if !self.capture.is_running() {
            return Err(SessionError::NotStarted);
        }
        let limit = (self.timeline().loop_duration_secs() * self.capture.sample_rate() as f64).round() as usize;
        self.capture.start_recording(Some(limit))?;

        if !self.history.tracks().is_empty() && !self.looper.is_playing() {
            self.play();
        }
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<SessionEvent, SessionError> {
        let recorded = self.capture.stop_recording()?;
        let track = self.add_recording(recorded)?;
        Ok(SessionEvent::TrackRecorded {
            id: track.id.clone(),
            duration_secs: track.duration_secs(),
        })
    }

    /// Turn captured audio into a track at the engine rate
    pub fn add_recording(&mut self, recorded: RecordedAudio) -> Result<Track, SessionError> {
        let sample_rate = self.sample_rate();
        let samples = resample(&recorded.samples, recorded.sample_rate, sample_rate)?;
        let (id, name) = self.history.allocate();
        let track = Track::new(id, name, samples, sample_rate, now_ms());

        info!(id = %track.id, duration = track.duration_secs(), "Track recorded");
        self.history.add(track.clone());
        self.sync_tracks();
        Ok(track)
    }

    pub fn tracks(&self) -> &[Track] {
        self.history.tracks()
    }

    pub fn delete_track(&mut self, id: &TrackId) -> Result<Track, SessionError> {
        let track = self.history.delete(id)?;
        self.sync_tracks();
        Ok(track)
    }

    /// Remove every track; undo history goes with them
    pub fn clear_tracks(&mut self) {
        self.history.clear();
        self.looper.stop();
        self.sync_tracks();
    }

    pub fn undo(&mut self) -> bool {
        let changed = self.history.undo();
        if changed {
            self.sync_tracks();
        }
        changed
    }

    pub fn redo(&mut self) -> bool {
        let changed = self.history.redo();
        if changed {
            self.sync_tracks();
        }
        changed
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn export_track(&self, id: &TrackId, path: &Path) -> Result<(), SessionError> {
        let track = self
            .history
            .get(id)
            .ok_or_else(|| EnsembleError::TrackNotFound(id.to_string()))?;
        export_track(path, track)?;
        Ok(())
    }

    /// Mix the audible tracks over one loop
    pub fn export_mix(&self, path: &Path) -> Result<(), SessionError> {
        let sample_rate = self.sample_rate();
        let loop_frames = (self.timeline().loop_duration_secs() * sample_rate as f64).round() as usize;
        let audible = self.history.tracks().iter().filter(|t| self.looper.is_audible(&t.id));
        export_mix(path, audible, sample_rate, loop_frames)?;
        Ok(())
    }

    fn sync_tracks(&self) {
        self.looper.update_tracks(self.history.tracks().to_vec());
    }

    fn persist(&self) {
        if let Some(path) = &self.config_path {
            save_config_to(&self.config, path);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.router.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from;
    use crate::synth::SynthSettings;
    use ensemble_core::PitchEstimate;

    fn session() -> Session {
        Session::new(EnsembleConfig::default(), 48000)
    }

    fn recording(len: usize, sample_rate: u32) -> RecordedAudio {
        RecordedAudio {
            samples: vec![0.1; len],
            sample_rate,
        }
    }

    fn router() -> (HarmonyRouter, Arc<EngineState>, Receiver<SessionEvent>) {
        let engine = Arc::new(EngineState::new(48000, SynthSettings::default()));
        let (tx, rx) = unbounded();
        let router = HarmonyRouter {
            pipeline: Arc::new(Mutex::new(HarmonyPipeline::default())),
            engine: engine.clone(),
            midi_out: Arc::new(Mutex::new(None)),
            events: tx,
            sounding: None,
        };
        (router, engine, rx)
    }

    fn pitch(frequency_hz: f64, confidence: f32) -> CaptureEvent {
        CaptureEvent::Pitch(PitchEstimate {
            frequency_hz,
            confidence,
            timestamp_seconds: 0.0,
        })
    }

    #[test]
    fn test_router_renders_confident_pitch() {
        let (mut router, engine, events) = router();

        router.on_capture(pitch(196.0, 0.5));
        assert_eq!(engine.voices.lock().unwrap().active_count(), 0);
        assert!(events.try_recv().is_err());

        router.on_capture(pitch(196.0, 0.95));
        assert_eq!(engine.voices.lock().unwrap().active_count(), 4);
        match events.try_recv() {
            Ok(SessionEvent::Harmony(update)) => assert_eq!(update.harmony.midi_numbers(), [55, 59, 62, 67]),
            other => panic!("expected harmony, got {other:?}"),
        }

        // Same harmony keeps sounding without a rebuild
        router.on_capture(pitch(197.0, 0.95));
        assert!(events.try_recv().is_err());

        // Silenced voices come back on the next estimate
        engine.voices.lock().unwrap().stop_all();
        router.on_capture(pitch(196.0, 0.95));
        assert_eq!(engine.voices.lock().unwrap().active_count(), 4);
    }

    #[test]
    fn test_router_midi_note_and_recording_full() {
        let (mut router, engine, events) = router();
        router.on_note(NoteEvent::from_midi(61));
        match events.try_recv() {
            Ok(SessionEvent::Harmony(update)) => {
                assert_eq!(update.source, NoteSource::Midi);
                assert_eq!(update.quantized.name(), "C4");
            }
            other => panic!("expected harmony, got {other:?}"),
        }
        assert_eq!(engine.voices.lock().unwrap().active_count(), 4);

        router.on_capture(CaptureEvent::RecordingFull);
        assert_eq!(events.try_recv().ok(), Some(SessionEvent::RecordingFull));
    }

    #[test]
    fn test_recordings_become_tracks() {
        let mut session = session();
        let first = session.add_recording(recording(4800, 48000)).unwrap();
        let second = session.add_recording(recording(4800, 48000)).unwrap();
        assert_eq!(first.id.as_str(), "track-1");
        assert_eq!(second.name, "Track 2");
        assert_eq!(session.tracks().len(), 2);

        assert!(session.undo());
        assert_eq!(session.tracks().len(), 1);
        assert!(session.redo());
        assert_eq!(session.tracks().len(), 2);

        session.delete_track(&first.id).unwrap();
        assert_eq!(session.tracks().len(), 1);
        assert!(session.delete_track(&first.id).is_err());

        session.clear_tracks();
        assert!(session.tracks().is_empty());
        assert!(!session.can_undo());
    }

    #[test]
    fn test_mute_and_solo_cleared_with_tracks() {
        let mut session = session();
        let first = session.add_recording(recording(4800, 48000)).unwrap();
        let second = session.add_recording(recording(4800, 48000)).unwrap();

        session.toggle_mute(&first.id);
        session.toggle_solo(&second.id);
        assert!(session.is_muted(&first.id));
        assert!(session.is_soloed(&second.id));
        assert!(!session.is_audible(&first.id));

        session.delete_track(&first.id).unwrap();
        assert!(!session.is_muted(&first.id));
        assert!(session.is_soloed(&second.id));

        session.clear_tracks();
        assert!(!session.is_soloed(&second.id));
    }

    #[test]
    fn test_recording_resampled_to_engine_rate() {
        let mut session = session();
        let track = session.add_recording(recording(2400, 24000)).unwrap();
        assert_eq!(track.sample_rate, 48000);
        assert_eq!(track.samples.len(), 4800);
    }

    #[test]
    fn test_recording_requires_started_session() {
        let mut session = session();
        assert!(matches!(session.start_recording(), Err(SessionError::NotStarted)));
        assert!(!session.play());
    }

    #[test]
    fn test_bpm_and_bars() {
        let mut session = session();
        session.set_bpm(90.0).unwrap();
        assert!(session.set_bpm(0.0).is_err());
        assert!(session.set_total_bars(0).is_err());
        session.set_total_bars(2).unwrap();

        let timeline = session.timeline();
        assert_eq!(timeline.bpm, 90.0);
        assert_eq!(timeline.total_bars, 2);
        assert_eq!(session.config().bpm, 90.0);
    }

    #[test]
    fn test_settings_persist() {
        let dir = std::env::temp_dir().join(format!("ensemble-session-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut session = session().with_config_path(path.clone());

        session.set_vowel(Vowel::O);
        session.set_mode(SynthMode::Simple);
        session.set_volume(VoiceRole::Bass, 0.9);

        let saved = load_config_from(&path);
        assert_eq!(saved.synth.vowel, Vowel::O);
        assert_eq!(saved.synth.mode, SynthMode::Simple);
        assert!((saved.synth.volumes.bass - 0.9).abs() < 1e-6);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_export_missing_track() {
        let session = session();
        let path = std::env::temp_dir().join("ensemble-missing.wav");
        assert!(matches!(
            session.export_track(&TrackId::from("track-9"), &path),
            Err(SessionError::Core(EnsembleError::TrackNotFound(_)))
        ));
    }
}
