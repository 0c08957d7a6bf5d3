//! Pitch-to-harmony pipeline

use crate::harmony::{harmonize, quantize_note, Harmony, HarmonySettings};
use crate::note::NoteEvent;
use crate::pitch::PitchEstimate;

/// Estimates at or below this confidence keep the previous harmony
pub const DEFAULT_CONFIDENCE_GATE: f32 = 0.8;

/// Where a note came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteSource {
    Voice,
    Midi,
}

/// A new harmony for the synthesizer and MIDI out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonyUpdate {
    pub source: NoteSource,
    pub detected: NoteEvent,
    pub quantized: NoteEvent,
    pub harmony: Harmony,
}

/// Holds the active settings and turns notes into harmonies
#[derive(Debug, Clone)]
pub struct HarmonyPipeline {
    settings: HarmonySettings,
    confidence_gate: f32,
    last: Option<HarmonyUpdate>,
}

impl Default for HarmonyPipeline {
    fn default() -> Self {
        Self::new(HarmonySettings::default())
    }
}

impl HarmonyPipeline {
    pub fn new(settings: HarmonySettings) -> Self {
        Self {
            settings,
            confidence_gate: DEFAULT_CONFIDENCE_GATE,
            last: None,
        }
    }

    pub fn with_confidence_gate(mut self, gate: f32) -> Self {
        self.confidence_gate = gate.clamp(0.0, 1.0);
        self
    }

    pub fn settings(&self) -> &HarmonySettings {
        &self.settings
    }

    /// Applies to the next note; the current harmony keeps sounding
    pub fn set_settings(&mut self, settings: HarmonySettings) {
        self.settings = settings;
    }

    pub fn last(&self) -> Option<&HarmonyUpdate> {
        self.last.as_ref()
    }

    /// Harmonize a pitch estimate that clears the confidence gate
    pub fn on_estimate(&mut self, estimate: &PitchEstimate) -> Option<HarmonyUpdate> {
        if estimate.confidence <= self.confidence_gate {
            return None;
        }
        let note = estimate.note()?;
        Some(self.on_note(note, NoteSource::Voice))
    }

    /// Harmonize a note, bypassing the estimator
    pub fn on_note(&mut self, note: NoteEvent, source: NoteSource) -> HarmonyUpdate {
        let update = HarmonyUpdate {
            source,
            detected: note,
            quantized: quantize_note(&note, &self.settings),
            harmony: harmonize(&note, &self.settings),
        };
        self.last = Some(update);
        update
    }
}
