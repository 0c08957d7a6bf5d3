//! ensemble-core: Pitch tracking, harmony and loop scheduling for the ensemble vocal harmonizer

mod error;
pub mod harmony;
mod history;
pub mod looper;
pub mod metronome;
mod note;
pub mod pipeline;
pub mod pitch;
mod timeline;
mod track;
pub mod vowel;

pub use error::{EnsembleError, Result};
pub use harmony::{generate, harmonize, quantize, quantize_note, Harmony, HarmonySettings, Scale, Voice, VoiceRole, Voicing};
pub use history::{History, TrackHistory, MAX_HISTORY};
pub use looper::{LoopScheduler, LoopState, PlaybackCommand, ScheduledPlayback, SourceId};
pub use metronome::{Click, MetronomeScheduler};
pub use note::{midi_to_frequency, note_to_midi, NoteEvent, PitchClass};
pub use pipeline::{HarmonyPipeline, HarmonyUpdate, NoteSource};
pub use pitch::{DipSearch, EstimatorConfig, PitchEstimate, PitchEstimator};
pub use timeline::{LookAhead, LookAheadScheduler, LoopTimeline};
pub use track::{Track, TrackId};
pub use vowel::{FormantSet, Vowel};
