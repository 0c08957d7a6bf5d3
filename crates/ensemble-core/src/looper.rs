//! Loop scheduler: bar-aligned multi-track playback with mute/solo
//!
//! The scheduler never touches audio. Each entry point returns the
//! [`PlaybackCommand`]s the audio engine must apply, with start and stop
//! times expressed on the engine's own clock so they land sample-accurately.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{EnsembleError, Result};
use crate::timeline::{LookAhead, LookAheadScheduler, LoopTimeline};
use crate::track::{Track, TrackId};

/// Handle for one playback source inside the audio engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// Side effect for the audio engine
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    /// Start looping `samples` at `when`, wrapping every `loop_secs`
    Start {
        source: SourceId,
        track_id: TrackId,
        samples: Arc<[f32]>,
        when: f64,
        loop_secs: f64,
        gain: f32,
    },
    /// Stop a source at `at`, or immediately when `None`
    Stop { source: SourceId, at: Option<f64> },
    /// Instantaneous gain change
    SetGain { source: SourceId, gain: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopState {
    Idle,
    /// Sources are scheduled but the first iteration has not started yet
    Armed { start_at: f64 },
    Playing,
}

/// Live binding between a track and its engine source
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledPlayback {
    pub track_id: TrackId,
    pub source: SourceId,
    pub gain: f32,
    pub loop_start_time: f64,
}

pub struct LoopScheduler {
    timeline: LoopTimeline,
    look_ahead: LookAhead,
    state: LoopState,
    tracks: Vec<Track>,
    /// Track set swapped in at the next boundary
    pending_tracks: Option<Vec<Track>>,
    playbacks: HashMap<TrackId, ScheduledPlayback>,
    /// Sources with a stop already scheduled at a boundary that has not passed yet
    retiring: Vec<(TrackId, SourceId, f64)>,
    muted: HashSet<TrackId>,
    soloed: HashSet<TrackId>,
    loop_start_time: f64,
    /// Timeline of the iteration currently sounding
    active_timeline: LoopTimeline,
    /// Start and timeline of an iteration scheduled but not yet sounding
    upcoming: Option<(f64, LoopTimeline)>,
    next_boundary: Option<f64>,
    current_bar: u32,
    next_source: u64,
}

impl LoopScheduler {
    pub fn new(timeline: LoopTimeline, look_ahead: LookAhead) -> Self {
        Self {
            timeline,
            look_ahead,
            state: LoopState::Idle,
            tracks: Vec::new(),
            pending_tracks: None,
            playbacks: HashMap::new(),
            retiring: Vec::new(),
            muted: HashSet::new(),
            soloed: HashSet::new(),
            loop_start_time: 0.0,
            active_timeline: timeline,
            upcoming: None,
            next_boundary: None,
            current_bar: 1,
            next_source: 1,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn timeline(&self) -> &LoopTimeline {
        &self.timeline
    }

    pub fn current_bar(&self) -> u32 {
        self.current_bar
    }

    pub fn next_boundary(&self) -> Option<f64> {
        self.next_boundary
    }

    pub fn loop_start_time(&self) -> f64 {
        self.loop_start_time
    }

    pub fn playback(&self, id: &TrackId) -> Option<&ScheduledPlayback> {
        self.playbacks.get(id)
    }

    pub fn is_muted(&self, id: &TrackId) -> bool {
        self.muted.contains(id)
    }

    pub fn is_soloed(&self, id: &TrackId) -> bool {
        self.soloed.contains(id)
    }

    /// Solo wins over mute: with any track soloed, only soloed tracks play
    pub fn is_audible(&self, id: &TrackId) -> bool {
        if self.soloed.is_empty() {
            !self.muted.contains(id)
        } else {
            self.soloed.contains(id)
        }
    }

    // ========================================================================
    // Timeline changes
    // ========================================================================

    /// New tempo; sources already scheduled keep their loop length
    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(EnsembleError::InvalidConfiguration(format!("bpm must be positive, got {bpm}")));
        }
        self.timeline.bpm = bpm;
        Ok(())
    }

    pub fn set_total_bars(&mut self, bars: u32) -> Result<()> {
        if bars == 0 {
            return Err(EnsembleError::InvalidConfiguration("loop needs at least one bar".into()));
        }
        self.timeline.total_bars = bars;
        Ok(())
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Schedule every track to start `start_delay` from now.
    ///
    /// An empty track list is a no-op. Starting while already running stops
    /// the current sources first.
    pub fn start_playback(&mut self, now: f64, tracks: &[Track]) -> Vec<PlaybackCommand> {
        if tracks.is_empty() {
            return Vec::new();
        }

        let mut commands = self.stop_playback();

        let start_at = now + self.look_ahead.start_delay_secs;
        let loop_secs = self.timeline.loop_duration_secs();
        self.tracks = tracks.to_vec();
        self.pending_tracks = None;
        self.retain_flags();
        self.loop_start_time = start_at;
        self.active_timeline = self.timeline;
        self.upcoming = None;
        self.next_boundary = Some(start_at + loop_secs);
        self.current_bar = 1;
        self.state = LoopState::Armed { start_at };

        self.schedule_all(start_at, loop_secs, &mut commands);
        commands
    }

    /// Stop every source immediately and return to idle. Safe to call twice.
    pub fn stop_playback(&mut self) -> Vec<PlaybackCommand> {
        let mut commands: Vec<PlaybackCommand> = self
            .playbacks
            .drain()
            .map(|(_, playback)| PlaybackCommand::Stop {
                source: playback.source,
                at: None,
            })
            .collect();
        commands.extend(
            self.retiring
                .drain(..)
                .map(|(_, source, _)| PlaybackCommand::Stop { source, at: None }),
        );

        self.state = LoopState::Idle;
        self.current_bar = 1;
        self.next_boundary = None;
        self.upcoming = None;
        commands
    }

    /// Replace the track set. While running, the swap happens at the next
    /// loop boundary.
    pub fn update_tracks(&mut self, tracks: Vec<Track>) {
        if self.state == LoopState::Idle {
            self.tracks = tracks;
            self.retain_flags();
        } else {
            self.pending_tracks = Some(tracks);
        }
    }

    pub fn toggle_mute(&mut self, id: &TrackId) -> Vec<PlaybackCommand> {
        if !self.muted.remove(id) {
            self.muted.insert(id.clone());
        }
        self.apply_gains()
    }

    pub fn toggle_solo(&mut self, id: &TrackId) -> Vec<PlaybackCommand> {
        if !self.soloed.remove(id) {
            self.soloed.insert(id.clone());
        }
        self.apply_gains()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn gain_for(&self, id: &TrackId) -> f32 {
        if self.is_audible(id) { 1.0 } else { 0.0 }
    }

    /// Recompute gain for every live source, including ones about to retire
    fn apply_gains(&mut self) -> Vec<PlaybackCommand> {
        let mut commands = Vec::with_capacity(self.playbacks.len() + self.retiring.len());

        let gains: Vec<(TrackId, f32)> = self
            .playbacks
            .keys()
            .map(|id| (id.clone(), self.gain_for(id)))
            .collect();
        for (id, gain) in gains {
            if let Some(playback) = self.playbacks.get_mut(&id) {
                playback.gain = gain;
                commands.push(PlaybackCommand::SetGain {
                    source: playback.source,
                    gain,
                });
            }
        }
        for (id, source, _) in &self.retiring {
            commands.push(PlaybackCommand::SetGain {
                source: *source,
                gain: self.gain_for(id),
            });
        }
        commands
    }

    /// Forget mute and solo for tracks that are neither in the set nor
    /// still sounding out their last iteration
    fn retain_flags(&mut self) {
        let live: HashSet<&TrackId> = self
            .tracks
            .iter()
            .map(|t| &t.id)
            .chain(self.retiring.iter().map(|(id, _, _)| id))
            .collect();
        self.muted.retain(|id| live.contains(id));
        self.soloed.retain(|id| live.contains(id));
    }

    fn allocate_source(&mut self) -> SourceId {
        let id = SourceId(self.next_source);
        self.next_source += 1;
        id
    }

    /// Start every current track at `when`, replacing any existing source
    /// for the same track at that instant
    fn schedule_all(&mut self, when: f64, loop_secs: f64, commands: &mut Vec<PlaybackCommand>) {
        let live: HashSet<TrackId> = self.tracks.iter().map(|t| t.id.clone()).collect();

        // Sources for tracks that left the set stop at the boundary too
        let departed: Vec<TrackId> = self.playbacks.keys().filter(|id| !live.contains(*id)).cloned().collect();
        for id in departed {
            if let Some(old) = self.playbacks.remove(&id) {
                commands.push(PlaybackCommand::Stop {
                    source: old.source,
                    at: Some(when),
                });
                self.retiring.push((id, old.source, when));
            }
        }

        let tracks = self.tracks.clone();
        for track in &tracks {
            let source = self.allocate_source();
            let gain = self.gain_for(&track.id);
            let playback = ScheduledPlayback {
                track_id: track.id.clone(),
                source,
                gain,
                loop_start_time: when,
            };
            if let Some(old) = self.playbacks.insert(track.id.clone(), playback) {
                commands.push(PlaybackCommand::Stop {
                    source: old.source,
                    at: Some(when),
                });
                self.retiring.push((track.id.clone(), old.source, when));
            }
            commands.push(PlaybackCommand::Start {
                source,
                track_id: track.id.clone(),
                samples: Arc::clone(&track.samples),
                when,
                loop_secs,
                gain,
            });
        }
    }
}

impl LookAheadScheduler for LoopScheduler {
    type Event = PlaybackCommand;

    fn tick(&mut self, now: f64) -> Vec<PlaybackCommand> {
        let mut commands = Vec::new();

        match self.state {
            LoopState::Idle => return commands,
            LoopState::Armed { start_at } if now >= start_at => self.state = LoopState::Playing,
            _ => {}
        }

        if let Some((start, timeline)) = self.upcoming.filter(|(start, _)| now >= *start) {
            self.loop_start_time = start;
            self.active_timeline = timeline;
            self.upcoming = None;
        }
        self.retiring.retain(|(_, _, stop_at)| *stop_at > now);
        self.retain_flags();

        if let Some(boundary) = self.next_boundary.filter(|b| self.look_ahead.is_due(now, *b)) {
            if let Some(tracks) = self.pending_tracks.take() {
                self.tracks = tracks;
            }
            let loop_secs = self.timeline.loop_duration_secs();
            self.schedule_all(boundary, loop_secs, &mut commands);
            self.next_boundary = Some(boundary + loop_secs);
            self.upcoming = Some((boundary, self.timeline));
        }

        self.current_bar = self.active_timeline.bar_at(now, self.loop_start_time);
        commands
    }

    fn is_running(&self) -> bool {
        self.state != LoopState::Idle
    }

    fn look_ahead(&self) -> &LookAhead {
        &self.look_ahead
    }
}
