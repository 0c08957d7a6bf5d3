//! Formant voice: harmonic source through vowel resonances plus breath noise

use std::f64::consts::TAU;
use std::fmt;

use ensemble_core::{VoiceRole, Vowel};
use fundsp::hacker::*;

pub const HARMONICS: usize = 6;
/// Headroom applied to the per-role volume
pub const FORMANT_HEADROOM: f32 = 0.3;
const BREATH_CUTOFF_HZ: f32 = 1000.0;
const BREATH_GAIN: f32 = 0.02;

/// Amplitude of harmonic `h` (1-based)
pub fn harmonic_amplitude(h: usize) -> f64 {
    1.0 / (h as f64 * 0.8) * 0.2
}

pub struct FormantVoice {
    role: VoiceRole,
    vowel: Vowel,
    frequency_hz: f64,
    sample_rate: f64,
    phase: f64,
    gain: f32,
    resonators: [An<FixedSvf<f64, BandpassMode<f64>>>; 3],
    breath: An<FixedSvf<f64, HighpassMode<f64>>>,
}

impl FormantVoice {
    pub fn new(role: VoiceRole, frequency_hz: f64, vowel: Vowel, volume: f32, sample_rate: f64) -> Self {
        let formants = vowel.formants().for_role(role);
        let q = formants.q_factors();
        let resonators = [0, 1, 2].map(|i| {
            let mut filter = bandpass_hz(formants.centers[i], q[i]);
            filter.set_sample_rate(sample_rate);
            filter
        });

        let mut breath = highpass_hz(BREATH_CUTOFF_HZ, 0.707);
        breath.set_sample_rate(sample_rate);

        Self {
            role,
            vowel,
            frequency_hz,
            sample_rate,
            phase: 0.0,
            gain: volume * FORMANT_HEADROOM,
            resonators,
            breath,
        }
    }

    pub fn role(&self) -> VoiceRole {
        self.role
    }

    pub fn vowel(&self) -> Vowel {
        self.vowel
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Output gain only; the filter graph is left alone
    pub fn set_volume(&mut self, volume: f32) {
        self.gain = volume * FORMANT_HEADROOM;
    }

    pub fn tick(&mut self) -> f32 {
        let nyquist = self.sample_rate / 2.0;
        let mut source = 0.0f64;
        for h in 1..=HARMONICS {
            if self.frequency_hz * h as f64 >= nyquist {
                break;
            }
            source += (self.phase * h as f64 * TAU).sin() * harmonic_amplitude(h);
        }
        self.phase = (self.phase + self.frequency_hz / self.sample_rate).fract();

        // Dry source and the three resonances are summed
        let input = Frame::from([source as f32]);
        let resonance: f32 = self.resonators.iter_mut().map(|filter| filter.tick(&input)[0]).sum();

        let noise = Frame::from([fastrand::f32() * 2.0 - 1.0]);
        let breath = self.breath.tick(&noise)[0] * BREATH_GAIN;

        (source as f32 + resonance + breath) * self.gain
    }
}

impl fmt::Debug for FormantVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormantVoice")
            .field("role", &self.role)
            .field("vowel", &self.vowel)
            .field("frequency_hz", &self.frequency_hz)
            .field("gain", &self.gain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harmonic_rolloff() {
        assert!((harmonic_amplitude(1) - 0.25).abs() < 1e-12);
        assert!((0..HARMONICS).all(|i| harmonic_amplitude(i + 2) < harmonic_amplitude(i + 1)));
    }

    #[test]
    fn test_renders_bounded_signal() {
        let mut voice = FormantVoice::new(VoiceRole::Alto, 220.0, Vowel::Ah, 0.5, 48000.0);
        let samples: Vec<f32> = (0..9600).map(|_| voice.tick()).collect();
        assert!(samples.iter().all(|s| s.is_finite()));
        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        assert!(rms > 0.001, "rms {rms}");
        assert!(samples.iter().all(|s| s.abs() < 1.0));
    }

    #[test]
    fn test_zero_volume_is_silent() {
        let mut voice = FormantVoice::new(VoiceRole::Bass, 110.0, Vowel::O, 0.0, 44100.0);
        assert!((0..1000).all(|_| voice.tick() == 0.0));
        voice.set_volume(0.5);
        assert!((voice.gain() - 0.15).abs() < 1e-6);
    }
}
