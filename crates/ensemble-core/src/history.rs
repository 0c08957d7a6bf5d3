//! Bounded undo/redo over track list snapshots

use std::collections::VecDeque;

use crate::error::{EnsembleError, Result};
use crate::track::{Track, TrackId};

/// Maximum number of undo steps kept
pub const MAX_HISTORY: usize = 50;

/// Snapshot history with a bounded past and a future cleared on every new edit
#[derive(Debug, Clone)]
pub struct History<T: Clone> {
    past: VecDeque<T>,
    present: T,
    future: Vec<T>,
    limit: usize,
}

impl<T: Clone> History<T> {
    pub fn new(initial: T) -> Self {
        Self::with_limit(initial, MAX_HISTORY)
    }

    pub fn with_limit(initial: T, limit: usize) -> Self {
        Self {
            past: VecDeque::new(),
            present: initial,
            future: Vec::new(),
            limit: limit.max(1),
        }
    }

    pub fn present(&self) -> &T {
        &self.present
    }

    /// Record a new state; the oldest snapshot is dropped past the limit
    pub fn push(&mut self, next: T) {
        let previous = std::mem::replace(&mut self.present, next);
        self.past.push_back(previous);
        while self.past.len() > self.limit {
            self.past.pop_front();
        }
        self.future.clear();
    }

    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.past.pop_back() else {
            return false;
        };
        let current = std::mem::replace(&mut self.present, previous);
        self.future.push(current);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(next) = self.future.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut self.present, next);
        self.past.push_back(current);
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.past.len()
    }
}

/// Recorded tracks with undo/redo and id allocation
#[derive(Debug, Clone)]
pub struct TrackHistory {
    history: History<Vec<Track>>,
    next_id: u64,
}

impl Default for TrackHistory {
    fn default() -> Self {
        Self {
            history: History::new(Vec::new()),
            next_id: 1,
        }
    }
}

impl TrackHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> &[Track] {
        self.history.present()
    }

    pub fn get(&self, id: &TrackId) -> Option<&Track> {
        self.tracks().iter().find(|t| &t.id == id)
    }

    /// Allocate the next id and default display name ("track-N", "Track N")
    pub fn allocate(&mut self) -> (TrackId, String) {
        let n = self.next_id;
        self.next_id += 1;
        (TrackId::new(format!("track-{n}")), format!("Track {n}"))
    }

    pub fn add(&mut self, track: Track) {
        let mut tracks = self.tracks().to_vec();
        tracks.push(track);
        self.history.push(tracks);
    }

    pub fn delete(&mut self, id: &TrackId) -> Result<Track> {
        let mut tracks = self.tracks().to_vec();
        let idx = tracks
            .iter()
            .position(|t| &t.id == id)
            .ok_or_else(|| EnsembleError::TrackNotFound(id.to_string()))?;
        let removed = tracks.remove(idx);
        self.history.push(tracks);
        Ok(removed)
    }

    /// Remove every track and forget the undo/redo history.
    /// Ids keep counting up.
    pub fn clear(&mut self) {
        self.history = History::new(Vec::new());
    }

    pub fn undo(&mut self) -> bool {
        self.history.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.history.redo()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(history: &mut TrackHistory) -> TrackId {
        let (id, name) = history.allocate();
        history.add(Track::new(id.clone(), name, vec![0.1; 16], 48000, 0));
        id
    }

    #[test]
    fn test_undo_redo() {
        let mut history = TrackHistory::new();
        let first = record(&mut history);
        let second = record(&mut history);
        assert_eq!(first.as_str(), "track-1");
        assert_eq!(history.get(&second).map(|t| t.name.as_str()), Some("Track 2"));

        assert!(history.undo());
        assert_eq!(history.tracks().len(), 1);
        assert!(history.can_redo());
        assert!(history.redo());
        assert_eq!(history.tracks().len(), 2);

        history.delete(&first).unwrap();
        assert_eq!(history.tracks().len(), 1);
        assert!(!history.can_redo());
        assert!(history.delete(&first).is_err());

        assert!(history.undo());
        assert_eq!(history.tracks()[0].id, first);

        history.clear();
        assert!(history.tracks().is_empty());
        assert!(!history.can_undo());
        assert_eq!(history.allocate().0.as_str(), "track-3");
    }

    #[test]
    fn test_bounded_past() {
        let mut history = History::new(0);
        for i in 1..=60 {
            history.push(i);
        }
        assert_eq!(history.undo_depth(), MAX_HISTORY);
        while history.undo() {}
        assert_eq!(*history.present(), 10);
    }

    #[test]
    fn test_new_edit_clears_future() {
        let mut history = History::new("a");
        history.push("b");
        history.undo();
        history.push("c");
        assert!(!history.can_redo());
        assert_eq!(*history.present(), "c");
    }
}
