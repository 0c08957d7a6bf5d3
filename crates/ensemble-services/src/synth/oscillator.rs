//! Single-oscillator voice

use std::f64::consts::TAU;

use ensemble_core::VoiceRole;

/// Headroom applied to the per-role volume
pub const SIMPLE_HEADROOM: f32 = 0.2;

/// Oscillator shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
    Sawtooth,
}

impl Waveform {
    /// Distinct timbres keep the four parts apart
    pub fn for_role(role: VoiceRole) -> Self {
        match role {
            VoiceRole::Bass => Self::Triangle,
            VoiceRole::Tenor => Self::Sawtooth,
            VoiceRole::Alto | VoiceRole::Soprano => Self::Sine,
        }
    }

    /// Value at `phase` in [0, 1), range [-1, 1]
    pub fn sample(self, phase: f64) -> f64 {
        match self {
            Self::Sine => (phase * TAU).sin(),
            Self::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Self::Sawtooth => 2.0 * phase - 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimpleVoice {
    role: VoiceRole,
    waveform: Waveform,
    frequency_hz: f64,
    sample_rate: f64,
    phase: f64,
    gain: f32,
}

impl SimpleVoice {
    pub fn new(role: VoiceRole, frequency_hz: f64, volume: f32, sample_rate: f64) -> Self {
        Self {
            role,
            waveform: Waveform::for_role(role),
            frequency_hz,
            sample_rate,
            phase: 0.0,
            gain: volume * SIMPLE_HEADROOM,
        }
    }

    pub fn role(&self) -> VoiceRole {
        self.role
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.gain = volume * SIMPLE_HEADROOM;
    }

    pub fn tick(&mut self) -> f32 {
        let out = self.waveform.sample(self.phase) as f32 * self.gain;
        self.phase = (self.phase + self.frequency_hz / self.sample_rate).fract();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_by_role() {
        assert_eq!(Waveform::for_role(VoiceRole::Bass), Waveform::Triangle);
        assert_eq!(Waveform::for_role(VoiceRole::Tenor), Waveform::Sawtooth);
        assert_eq!(Waveform::for_role(VoiceRole::Alto), Waveform::Sine);
        assert_eq!(Waveform::for_role(VoiceRole::Soprano), Waveform::Sine);
    }

    #[test]
    fn test_output_within_headroom() {
        for role in VoiceRole::ALL {
            let mut voice = SimpleVoice::new(role, 220.0, 0.5, 48000.0);
            let peak = (0..4800).map(|_| voice.tick().abs()).fold(0.0f32, f32::max);
            assert!(peak <= 0.1 + 1e-6, "{role}: {peak}");
            assert!(peak > 0.05, "{role}: {peak}");
        }
    }

    #[test]
    fn test_volume_change_keeps_phase() {
        let mut voice = SimpleVoice::new(VoiceRole::Alto, 440.0, 0.5, 48000.0);
        for _ in 0..10 {
            voice.tick();
        }
        let phase = voice.phase;
        voice.set_volume(1.0);
        assert_eq!(voice.phase, phase);
        assert!((voice.gain() - 0.2).abs() < 1e-6);
    }
}
