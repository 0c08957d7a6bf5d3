//! Scale quantization and four-part harmony generation

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::note::{midi_to_frequency, note_to_midi, NoteEvent, PitchClass};

// ============================================================================
// Scales
// ============================================================================

/// Scale used for quantization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Major,
    Minor,
}

impl Scale {
    /// Scale intervals (semitones from key), ascending
    pub fn intervals(&self) -> &'static [u8; 7] {
        match self {
            Self::Major => &[0, 2, 4, 5, 7, 9, 11],
            Self::Minor => &[0, 2, 3, 5, 7, 8, 10],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
        }
    }

    /// Lenient parse; unrecognized names fall back to major
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "minor" => Self::Minor,
            _ => Self::Major,
        }
    }

    /// Pitch classes of this scale in `key`, in ascending interval order
    pub fn pitch_classes(&self, key: PitchClass) -> [PitchClass; 7] {
        self.intervals().map(|interval| PitchClass::new(key.index() as i32 + interval as i32))
    }
}

/// Snap a detected pitch class to the nearest pitch class of the scale.
///
/// Distance is circular; on a tie the scale degree with the lower interval
/// wins. The octave passes through unchanged.
pub fn quantize(detected: PitchClass, octave: i32, key: PitchClass, scale: Scale) -> (PitchClass, i32) {
    let mut nearest = key;
    let mut min_dist = u8::MAX;

    for candidate in scale.pitch_classes(key) {
        let dist = detected.distance(candidate);
        if dist < min_dist {
            min_dist = dist;
            nearest = candidate;
        }
    }

    (nearest, octave)
}

/// Quantize a full note event under the given settings
pub fn quantize_note(note: &NoteEvent, settings: &HarmonySettings) -> NoteEvent {
    let (pitch_class, octave) = quantize(note.pitch_class, note.octave, settings.key, settings.scale);
    NoteEvent::from_midi(note_to_midi(pitch_class, octave))
}

// ============================================================================
// Voicings and voices
// ============================================================================

/// Harmony role, ordered low to high
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceRole {
    Bass,
    Tenor,
    Alto,
    Soprano,
}

impl VoiceRole {
    pub const ALL: [VoiceRole; 4] = [Self::Bass, Self::Tenor, Self::Alto, Self::Soprano];

    /// Slot index 0..4, bass first
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bass => "bass",
            Self::Tenor => "tenor",
            Self::Alto => "alto",
            Self::Soprano => "soprano",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for VoiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Voicing policy: fixed semitone offsets from the root for each role.
///
/// The thirds and fifths come from the major scale whatever the active
/// scale is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voicing {
    #[default]
    Triad,
    Satb,
    Close,
    Open,
}

impl Voicing {
    /// Offsets in role order: bass, tenor, alto, soprano
    pub fn offsets(&self) -> [i32; 4] {
        const MAJOR_THIRD: i32 = 4;
        const PERFECT_FIFTH: i32 = 7;
        const OCTAVE: i32 = 12;

        match self {
            Self::Triad => [0, MAJOR_THIRD, PERFECT_FIFTH, OCTAVE],
            Self::Satb => [-OCTAVE, 0, MAJOR_THIRD, PERFECT_FIFTH + OCTAVE],
            Self::Close => [0, 3, 5, 7],
            Self::Open => [-OCTAVE, MAJOR_THIRD, PERFECT_FIFTH, MAJOR_THIRD + OCTAVE],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Triad => "triad",
            Self::Satb => "satb",
            Self::Close => "close",
            Self::Open => "open",
        }
    }

    /// Lenient parse; unrecognized names fall back to triad
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "satb" => Self::Satb,
            "close" => Self::Close,
            "open" => Self::Open,
            _ => Self::Triad,
        }
    }
}

/// One sung part of a harmony
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub role: VoiceRole,
    pub midi_number: i32,
    pub frequency_hz: f64,
}

impl Voice {
    pub fn new(role: VoiceRole, midi_number: i32) -> Self {
        Self {
            role,
            midi_number,
            frequency_hz: midi_to_frequency(midi_number),
        }
    }

    pub fn note(&self) -> NoteEvent {
        NoteEvent::from_midi(self.midi_number)
    }
}

/// A complete four-part harmony, exactly one voice per role
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Harmony {
    voices: [Voice; 4],
}

impl Harmony {
    pub fn voices(&self) -> &[Voice; 4] {
        &self.voices
    }

    pub fn voice(&self, role: VoiceRole) -> &Voice {
        &self.voices[role.index()]
    }

    pub fn midi_numbers(&self) -> [i32; 4] {
        self.voices.map(|v| v.midi_number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }
}

/// User-selected harmony configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HarmonySettings {
    pub key: PitchClass,
    pub scale: Scale,
    pub voicing: Voicing,
}

impl HarmonySettings {
    pub fn new(key: PitchClass, scale: Scale, voicing: Voicing) -> Self {
        Self { key, scale, voicing }
    }
}

// ============================================================================
// Harmony generator
// ============================================================================

/// Expand a root note into four voices under a voicing policy.
///
/// `_scale` is accepted for symmetry with [`quantize`]; voicings use fixed
/// major-scale intervals.
pub fn generate(root: PitchClass, octave: i32, _scale: Scale, voicing: Voicing) -> Harmony {
    let root_midi = note_to_midi(root, octave);
    let offsets = voicing.offsets();
    let voices = VoiceRole::ALL.map(|role| Voice::new(role, root_midi + offsets[role.index()]));
    Harmony { voices }
}

/// Quantize a detected note and generate its harmony
pub fn harmonize(note: &NoteEvent, settings: &HarmonySettings) -> Harmony {
    let (root, octave) = quantize(note.pitch_class, note.octave, settings.key, settings.scale);
    generate(root, octave, settings.scale, settings.voicing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_in_scale_is_identity() {
        for key in 0..12 {
            let key = PitchClass::new(key);
            for scale in [Scale::Major, Scale::Minor] {
                for pc in scale.pitch_classes(key) {
                    assert_eq!(quantize(pc, 3, key, scale), (pc, 3));
                }
            }
        }
    }

    #[test]
    fn test_quantize_tie_breaks_low() {
        // C# is one semitone from both C and D
        assert_eq!(quantize(PitchClass::new(1), 4, PitchClass::C, Scale::Major), (PitchClass::C, 4));
        // D# -> D, F# -> F
        assert_eq!(quantize(PitchClass::new(3), 4, PitchClass::C, Scale::Major).0, PitchClass::D);
        assert_eq!(quantize(PitchClass::new(6), 4, PitchClass::C, Scale::Major).0, PitchClass::F);
        // C# major has no B; A# (interval 9) is tied with C (interval 11) and wins
        assert_eq!(quantize(PitchClass::B, 2, PitchClass::new(1), Scale::Major), (PitchClass::new(10), 2));
    }

    #[test]
    fn test_quantize_minor() {
        // A minor: A B C D E F G
        let key = PitchClass::A;
        // G# sits between G and A; the key itself comes first
        assert_eq!(quantize(PitchClass::new(8), 3, key, Scale::Minor).0, PitchClass::A);
        assert_eq!(quantize(PitchClass::new(1), 3, key, Scale::Minor).0, PitchClass::C);
    }

    #[test]
    fn test_voicing_table() {
        let cases = [
            (Voicing::Triad, [55, 59, 62, 67]),
            (Voicing::Satb, [43, 55, 59, 74]),
            (Voicing::Close, [55, 58, 60, 62]),
            (Voicing::Open, [43, 59, 62, 71]),
        ];
        for (voicing, expected) in cases {
            let harmony = generate(PitchClass::G, 3, Scale::Major, voicing);
            assert_eq!(harmony.midi_numbers(), expected, "{voicing:?}");
        }
    }

    #[test]
    fn test_generate_roles_and_order() {
        for voicing in [Voicing::Triad, Voicing::Satb, Voicing::Close, Voicing::Open] {
            for root in 0..12 {
                let harmony = generate(PitchClass::new(root), 4, Scale::Minor, voicing);
                let roles: Vec<_> = harmony.iter().map(|v| v.role).collect();
                assert_eq!(roles, VoiceRole::ALL.to_vec());
                let midi = harmony.midi_numbers();
                assert!(midi.windows(2).all(|w| w[0] < w[1]), "{voicing:?} {midi:?}");
            }
        }
    }

    #[test]
    fn test_scenario_g3_triad() {
        let settings = HarmonySettings::new(PitchClass::C, Scale::Major, Voicing::Triad);
        let detected = NoteEvent::from_midi(55);
        let harmony = harmonize(&detected, &settings);
        assert_eq!(harmony.voice(VoiceRole::Bass).midi_number, 55);
        assert_eq!(harmony.voice(VoiceRole::Tenor).midi_number, 59);
        assert_eq!(harmony.voice(VoiceRole::Alto).midi_number, 62);
        assert_eq!(harmony.voice(VoiceRole::Soprano).midi_number, 67);
        assert!((harmony.voice(VoiceRole::Soprano).frequency_hz - 392.0).abs() < 0.01);
    }

    #[test]
    fn test_quantize_note_c_sharp() {
        let settings = HarmonySettings::default();
        let quantized = quantize_note(&NoteEvent::from_midi(61), &settings);
        assert_eq!(quantized.name(), "C4");
    }

    #[test]
    fn test_lenient_names() {
        assert_eq!(Voicing::from_name("SATB"), Voicing::Satb);
        assert_eq!(Voicing::from_name("drop2"), Voicing::Triad);
        assert_eq!(Scale::from_name("dorian"), Scale::Major);
        assert_eq!(VoiceRole::from_name("Alto"), Some(VoiceRole::Alto));
    }
}
