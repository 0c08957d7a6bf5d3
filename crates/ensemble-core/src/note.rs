//! Note naming and 12-TET frequency mapping (A4 = 440 Hz)

use std::fmt;

use serde::{Deserialize, Serialize};

pub const A4_HZ: f64 = 440.0;
pub const A4_MIDI: i32 = 69;

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Pitch class 0..11 (C = 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PitchClass(u8);

impl PitchClass {
    pub const C: Self = Self(0);
    pub const D: Self = Self(2);
    pub const E: Self = Self(4);
    pub const F: Self = Self(5);
    pub const G: Self = Self(7);
    pub const A: Self = Self(9);
    pub const B: Self = Self(11);

    /// Wraps any semitone count into 0..11
    pub fn new(semitones: i32) -> Self {
        Self(semitones.rem_euclid(12) as u8)
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        NOTE_NAMES[self.0 as usize]
    }

    /// Parse a sharp-spelled name ("C", "F#"); flats are accepted too
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Some(idx) = NOTE_NAMES.iter().position(|n| n.eq_ignore_ascii_case(name)) {
            return Some(Self(idx as u8));
        }

        let mut chars = name.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let natural = NOTE_NAMES.iter().position(|n| n.len() == 1 && n.starts_with(letter))?;
        match chars.as_str() {
            "b" => Some(Self::new(natural as i32 - 1)),
            _ => None,
        }
    }

    /// Circular distance in semitones (0..=6)
    pub fn distance(self, other: Self) -> u8 {
        let d = (self.0 as i32 - other.0 as i32).unsigned_abs() as u8;
        d.min(12 - d)
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for PitchClass {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_name(&value).ok_or_else(|| format!("unknown pitch class '{value}'"))
    }
}

impl From<PitchClass> for String {
    fn from(pc: PitchClass) -> Self {
        pc.name().to_string()
    }
}

/// A note derived from a frequency or received from an external source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch_class: PitchClass,
    pub octave: i32,
    pub midi_number: i32,
    /// Deviation from the equal-tempered note, in cents (-50..=50)
    pub cents_offset: i32,
}

impl NoteEvent {
    /// Map a frequency to the nearest equal-tempered note
    pub fn from_frequency(frequency_hz: f64) -> Option<Self> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return None;
        }
        let exact = 12.0 * (frequency_hz / A4_HZ).log2() + A4_MIDI as f64;
        let midi_number = exact.round() as i32;
        let cents_offset = ((exact - midi_number as f64) * 100.0).round() as i32;

        Some(Self {
            cents_offset,
            ..Self::from_midi(midi_number)
        })
    }

    pub fn from_midi(midi_number: i32) -> Self {
        Self {
            pitch_class: PitchClass::new(midi_number),
            octave: midi_number.div_euclid(12) - 1,
            midi_number,
            cents_offset: 0,
        }
    }

    pub fn frequency(&self) -> f64 {
        midi_to_frequency(self.midi_number)
    }

    /// Display name such as "C#4"
    pub fn name(&self) -> String {
        format!("{}{}", self.pitch_class, self.octave)
    }
}

/// MIDI number for a pitch class in a given octave (C4 = 60)
pub fn note_to_midi(pitch_class: PitchClass, octave: i32) -> i32 {
    (octave + 1) * 12 + pitch_class.index() as i32
}

pub fn midi_to_frequency(midi: i32) -> f64 {
    A4_HZ * 2.0_f64.powf((midi - A4_MIDI) as f64 / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_frequency() {
        let a4 = NoteEvent::from_frequency(440.0).unwrap();
        assert_eq!(a4.midi_number, 69);
        assert_eq!(a4.pitch_class, PitchClass::A);
        assert_eq!(a4.octave, 4);
        assert_eq!(a4.cents_offset, 0);

        // Slightly sharp G3
        let g3 = NoteEvent::from_frequency(196.0 * 1.005).unwrap();
        assert_eq!(g3.name(), "G3");
        assert!(g3.cents_offset > 0 && g3.cents_offset < 10);

        assert!(NoteEvent::from_frequency(0.0).is_none());
        assert!(NoteEvent::from_frequency(f64::NAN).is_none());
    }

    #[test]
    fn test_midi_mapping() {
        assert_eq!(note_to_midi(PitchClass::C, 4), 60);
        assert_eq!(note_to_midi(PitchClass::G, 3), 55);
        assert!((midi_to_frequency(69) - 440.0).abs() < 1e-9);
        assert!((midi_to_frequency(57) - 220.0).abs() < 1e-9);
        assert_eq!(NoteEvent::from_midi(0).octave, -1);
    }

    #[test]
    fn test_pitch_class_names() {
        assert_eq!(PitchClass::from_name("F#"), Some(PitchClass::new(6)));
        assert_eq!(PitchClass::from_name("bb"), Some(PitchClass::new(10)));
        assert_eq!(PitchClass::from_name("Db"), Some(PitchClass::new(1)));
        assert_eq!(PitchClass::from_name("Cb"), Some(PitchClass::B));
        assert_eq!(PitchClass::from_name("H"), None);
        assert_eq!(PitchClass::new(-1), PitchClass::B);
        assert_eq!(PitchClass::C.distance(PitchClass::B), 1);
        assert_eq!(PitchClass::C.distance(PitchClass::new(6)), 6);
    }
}
