//! Loop and metronome services: core schedulers driven by timer threads
//! against the engine clock

use std::sync::{Arc, Mutex};

use ensemble_core::{
    LookAhead, LookAheadScheduler, LoopScheduler, LoopTimeline, MetronomeScheduler, PlaybackCommand, Track,
    TrackId,
};
use tracing::{info, warn};

use crate::audio_engine::EngineState;
use crate::timer::LookAheadTimer;

/// Tick `scheduler` on a timer thread and hand its events to `apply`
fn spawn_driver<S, A>(
    name: &str,
    scheduler: Arc<Mutex<S>>,
    engine: Arc<EngineState>,
    apply: A,
) -> Option<LookAheadTimer>
where
    S: LookAheadScheduler + Send + 'static,
    A: Fn(&EngineState, Vec<S::Event>) + Send + 'static,
{
    let interval = scheduler.lock().ok()?.look_ahead().interval;
    let timer = LookAheadTimer::spawn(name, interval, move || {
        let events = match scheduler.lock() {
            Ok(mut scheduler) => scheduler.tick(engine.now()),
            Err(_) => return,
        };
        if !events.is_empty() {
            apply(&engine, events);
        }
    });

    match timer {
        Ok(timer) => Some(timer),
        Err(e) => {
            warn!(timer = name, "Failed to spawn scheduler thread: {}", e);
            None
        }
    }
}

fn apply_playback(engine: &EngineState, commands: Vec<PlaybackCommand>) {
    if let Ok(mut playback) = engine.playback.lock() {
        playback.apply_all(commands);
    }
}

// ============================================================================
// Looper
// ============================================================================

pub struct LooperService {
    scheduler: Arc<Mutex<LoopScheduler>>,
    engine: Arc<EngineState>,
    timer: Option<LookAheadTimer>,
}

impl LooperService {
    pub fn new(engine: Arc<EngineState>, timeline: LoopTimeline, look_ahead: LookAhead) -> Self {
        Self {
            scheduler: Arc::new(Mutex::new(LoopScheduler::new(timeline, look_ahead))),
            engine,
            timer: None,
        }
    }

    pub fn with_scheduler<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut LoopScheduler) -> R,
    {
        self.scheduler.lock().ok().map(|mut s| f(&mut s))
    }

    pub fn is_playing(&self) -> bool {
        self.with_scheduler(|s| s.is_running()).unwrap_or(false)
    }

    pub fn current_bar(&self) -> u32 {
        self.with_scheduler(|s| s.current_bar()).unwrap_or(1)
    }

    /// Start looping `tracks`; returns false when there is nothing to play
    pub fn start(&mut self, tracks: &[Track]) -> bool {
        let now = self.engine.now();
        let Some((commands, running)) = self.with_scheduler(|s| (s.start_playback(now, tracks), s.is_running()))
        else {
            return false;
        };
        apply_playback(&self.engine, commands);

        if running && self.timer.is_none() {
            self.timer = spawn_driver("ensemble-looper", self.scheduler.clone(), self.engine.clone(), apply_playback);
        }
        if running {
            info!(tracks = tracks.len(), "Loop playback started");
        }
        running
    }

    /// Cancel the timer, then stop every source before returning
    pub fn stop(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        if let Some(commands) = self.with_scheduler(|s| s.stop_playback()) {
            if !commands.is_empty() {
                info!("Loop playback stopped");
            }
            apply_playback(&self.engine, commands);
        }
    }

    pub fn update_tracks(&self, tracks: Vec<Track>) {
        self.with_scheduler(|s| s.update_tracks(tracks));
    }

    pub fn toggle_mute(&self, id: &TrackId) {
        if let Some(commands) = self.with_scheduler(|s| s.toggle_mute(id)) {
            apply_playback(&self.engine, commands);
        }
    }

    pub fn toggle_solo(&self, id: &TrackId) {
        if let Some(commands) = self.with_scheduler(|s| s.toggle_solo(id)) {
            apply_playback(&self.engine, commands);
        }
    }

    pub fn is_audible(&self, id: &TrackId) -> bool {
        self.with_scheduler(|s| s.is_audible(id)).unwrap_or(true)
    }

    pub fn is_muted(&self, id: &TrackId) -> bool {
        self.with_scheduler(|s| s.is_muted(id)).unwrap_or(false)
    }

    pub fn is_soloed(&self, id: &TrackId) -> bool {
        self.with_scheduler(|s| s.is_soloed(id)).unwrap_or(false)
    }
}

impl Drop for LooperService {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Metronome
// ============================================================================

pub struct MetronomeService {
    scheduler: Arc<Mutex<MetronomeScheduler>>,
    engine: Arc<EngineState>,
    timer: Option<LookAheadTimer>,
}

impl MetronomeService {
    pub fn new(engine: Arc<EngineState>, timeline: LoopTimeline, look_ahead: LookAhead) -> Self {
        Self {
            scheduler: Arc::new(Mutex::new(MetronomeScheduler::new(timeline, look_ahead))),
            engine,
            timer: None,
        }
    }

    pub fn with_scheduler<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut MetronomeScheduler) -> R,
    {
        self.scheduler.lock().ok().map(|mut s| f(&mut s))
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    pub fn start(&mut self) {
        if self.timer.is_some() {
            return;
        }
        let now = self.engine.now();
        self.with_scheduler(|s| s.start(now));
        self.timer = spawn_driver(
            "ensemble-metronome",
            self.scheduler.clone(),
            self.engine.clone(),
            |engine, clicks| {
                if let Ok(mut track) = engine.clicks.lock() {
                    for click in &clicks {
                        track.schedule(click);
                    }
                }
            },
        );
        info!("Metronome started");
    }

    /// Cancel the timer and drop every scheduled click
    pub fn stop(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
            info!("Metronome stopped");
        }
        self.with_scheduler(|s| s.stop());
        if let Ok(mut track) = self.engine.clicks.lock() {
            track.clear();
        }
    }

    pub fn toggle(&mut self) -> bool {
        if self.is_running() {
            self.stop();
        } else {
            self.start();
        }
        self.is_running()
    }
}

impl Drop for MetronomeService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::SynthSettings;

    fn engine() -> Arc<EngineState> {
        Arc::new(EngineState::new(1000, SynthSettings::default()))
    }

    #[test]
    fn test_looper_start_and_stop() {
        let engine = engine();
        let mut looper = LooperService::new(engine.clone(), LoopTimeline::default(), LookAhead::default());
        assert!(!looper.start(&[]));

        let track = Track::new(TrackId::from("track-1"), "Track 1", vec![0.25; 100], 1000, 0);
        assert!(looper.start(std::slice::from_ref(&track)));
        assert_eq!(engine.playback.lock().map(|p| p.active_sources()).unwrap_or(0), 1);

        looper.stop();
        assert!(!looper.is_playing());
        assert_eq!(engine.playback.lock().map(|p| p.active_sources()).unwrap_or(1), 0);
        looper.stop();
    }

    #[test]
    fn test_metronome_stop_clears_clicks() {
        let engine = engine();
        let mut metronome = MetronomeService::new(engine.clone(), LoopTimeline::default(), LookAhead::default());
        assert!(metronome.toggle());
        // The first tick runs immediately on the timer thread
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!metronome.toggle());
        assert_eq!(engine.clicks.lock().map(|c| c.pending()).unwrap_or(1), 0);
    }
}
