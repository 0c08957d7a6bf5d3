//! Recorded tracks

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unique track identifier ("track-1", "track-2", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A finished recording.
///
/// Samples are shared and never mutated after creation, so cloning a track
/// (or a whole track list for undo snapshots) only bumps a refcount.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    /// Unix time in milliseconds
    pub created_at_ms: u64,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>, samples: Vec<f32>, sample_rate: u32, created_at_ms: u64) -> Self {
        Self {
            id,
            name: name.into(),
            samples: samples.into(),
            sample_rate,
            created_at_ms,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_samples() {
        let track = Track::new(TrackId::from("track-1"), "Track 1", vec![0.0; 48000], 48000, 0);
        let copy = track.clone();
        assert!(Arc::ptr_eq(&track.samples, &copy.samples));
        assert_eq!(track.duration_secs(), 1.0);
    }
}
