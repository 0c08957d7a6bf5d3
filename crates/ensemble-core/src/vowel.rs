//! Vowel formant tables and per-role vocal-tract scaling

use serde::{Deserialize, Serialize};

use crate::harmony::VoiceRole;

/// Sung vowel for the formant model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vowel {
    A,
    E,
    I,
    O,
    U,
    #[default]
    Ah,
}

impl Vowel {
    pub const ALL: [Vowel; 6] = [Self::A, Self::E, Self::I, Self::O, Self::U, Self::Ah];

    pub fn name(&self) -> &'static str {
        match self {
            Self::A => "a",
            Self::E => "e",
            Self::I => "i",
            Self::O => "o",
            Self::U => "u",
            Self::Ah => "ah",
        }
    }

    /// Lenient parse; unknown vowels use "ah"
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(name))
            .unwrap_or_default()
    }

    /// First three formants and their bandwidths (Hz)
    pub fn formants(&self) -> FormantSet {
        let (centers, bandwidths) = match self {
            Self::A => ([730.0, 1090.0, 2440.0], [90.0, 110.0, 120.0]),
            Self::E => ([530.0, 1840.0, 2480.0], [90.0, 100.0, 120.0]),
            Self::I => ([270.0, 2290.0, 3010.0], [60.0, 90.0, 100.0]),
            Self::O => ([570.0, 840.0, 2410.0], [90.0, 100.0, 120.0]),
            Self::U => ([300.0, 870.0, 2240.0], [80.0, 100.0, 120.0]),
            Self::Ah => ([640.0, 1190.0, 2390.0], [80.0, 90.0, 100.0]),
        };
        FormantSet { centers, bandwidths }
    }
}

/// F1..F3 centre frequencies with matching bandwidths
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormantSet {
    pub centers: [f32; 3],
    pub bandwidths: [f32; 3],
}

impl FormantSet {
    /// Band-pass Q for each formant (centre / bandwidth)
    pub fn q_factors(&self) -> [f32; 3] {
        [0, 1, 2].map(|i| self.centers[i] / self.bandwidths[i])
    }

    /// Scale the centres by a role's vocal-tract modifier
    pub fn for_role(&self, role: VoiceRole) -> FormantSet {
        let modifier = formant_modifier(role);
        FormantSet {
            centers: [0, 1, 2].map(|i| self.centers[i] * modifier[i]),
            bandwidths: self.bandwidths,
        }
    }
}

/// Per-formant multipliers: shorter tracts (soprano) raise formants, longer
/// tracts (bass) lower them
pub fn formant_modifier(role: VoiceRole) -> [f32; 3] {
    match role {
        VoiceRole::Soprano => [1.15, 1.1, 1.05],
        VoiceRole::Alto => [1.05, 1.05, 1.0],
        VoiceRole::Tenor => [0.95, 0.95, 0.95],
        VoiceRole::Bass => [0.85, 0.9, 0.9],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_vowel_falls_back() {
        assert_eq!(Vowel::from_name("oo"), Vowel::Ah);
        assert_eq!(Vowel::from_name("E"), Vowel::E);
    }

    #[test]
    fn test_role_scaling() {
        let ah = Vowel::Ah.formants();
        let soprano = ah.for_role(VoiceRole::Soprano);
        let bass = ah.for_role(VoiceRole::Bass);
        for i in 0..3 {
            assert!(soprano.centers[i] > ah.centers[i]);
            assert!(bass.centers[i] < ah.centers[i]);
        }
        assert!((soprano.centers[0] - 736.0).abs() < 0.01);
    }

    #[test]
    fn test_q_factors() {
        let q = Vowel::I.formants().q_factors();
        assert!((q[0] - 4.5).abs() < 1e-6);
    }
}
