//! Harmony voice synthesis

mod formant;
mod oscillator;

pub use formant::{FormantVoice, FORMANT_HEADROOM, HARMONICS};
pub use oscillator::{SimpleVoice, Waveform, SIMPLE_HEADROOM};

use ensemble_core::{Harmony, VoiceRole, Vowel};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rendering strategy for harmony voices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthMode {
    Simple,
    #[default]
    Formant,
}

impl SynthMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Formant => "formant",
        }
    }
}

/// Per-role output volume in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceVolumes {
    pub bass: f32,
    pub tenor: f32,
    pub alto: f32,
    pub soprano: f32,
}

impl Default for VoiceVolumes {
    fn default() -> Self {
        Self {
            bass: 0.5,
            tenor: 0.5,
            alto: 0.5,
            soprano: 0.5,
        }
    }
}

impl VoiceVolumes {
    pub fn get(&self, role: VoiceRole) -> f32 {
        match role {
            VoiceRole::Bass => self.bass,
            VoiceRole::Tenor => self.tenor,
            VoiceRole::Alto => self.alto,
            VoiceRole::Soprano => self.soprano,
        }
    }

    pub fn set(&mut self, role: VoiceRole, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        match role {
            VoiceRole::Bass => self.bass = volume,
            VoiceRole::Tenor => self.tenor = volume,
            VoiceRole::Alto => self.alto = volume,
            VoiceRole::Soprano => self.soprano = volume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthSettings {
    pub mode: SynthMode,
    pub vowel: Vowel,
    pub volumes: VoiceVolumes,
}

/// One live voice in either rendering mode
#[derive(Debug)]
pub enum SynthVoice {
    Simple(SimpleVoice),
    Formant(FormantVoice),
}

impl SynthVoice {
    pub fn build(role: VoiceRole, frequency_hz: f64, settings: &SynthSettings, sample_rate: f64) -> Self {
        let volume = settings.volumes.get(role);
        match settings.mode {
            SynthMode::Simple => Self::Simple(SimpleVoice::new(role, frequency_hz, volume, sample_rate)),
            SynthMode::Formant => {
                Self::Formant(FormantVoice::new(role, frequency_hz, settings.vowel, volume, sample_rate))
            }
        }
    }

    pub fn mode(&self) -> SynthMode {
        match self {
            Self::Simple(_) => SynthMode::Simple,
            Self::Formant(_) => SynthMode::Formant,
        }
    }

    pub fn frequency_hz(&self) -> f64 {
        match self {
            Self::Simple(v) => v.frequency_hz(),
            Self::Formant(v) => v.frequency_hz(),
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        match self {
            Self::Simple(v) => v.set_volume(volume),
            Self::Formant(v) => v.set_volume(volume),
        }
    }

    pub fn tick(&mut self) -> f32 {
        match self {
            Self::Simple(v) => v.tick(),
            Self::Formant(v) => v.tick(),
        }
    }
}

/// Fixed arena of four voice slots, indexed by role
#[derive(Debug)]
pub struct VoiceBank {
    slots: [Option<SynthVoice>; 4],
    settings: SynthSettings,
    sample_rate: f64,
}

impl VoiceBank {
    pub fn new(settings: SynthSettings, sample_rate: u32) -> Self {
        Self {
            slots: [None, None, None, None],
            settings,
            sample_rate: sample_rate as f64,
        }
    }

    pub fn settings(&self) -> &SynthSettings {
        &self.settings
    }

    pub fn voice(&self, role: VoiceRole) -> Option<&SynthVoice> {
        self.slots[role.index()].as_ref()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Replace the role's voice; the previous one is dropped first
    pub fn render_voice(&mut self, role: VoiceRole, frequency_hz: f64) {
        let slot = &mut self.slots[role.index()];
        *slot = None;
        *slot = Some(SynthVoice::build(role, frequency_hz, &self.settings, self.sample_rate));
    }

    /// Replace all four voices, bass first
    pub fn render_harmony(&mut self, harmony: &Harmony) {
        for voice in harmony.iter() {
            self.render_voice(voice.role, voice.frequency_hz);
        }
    }

    /// Returns false if the role was already silent
    pub fn stop(&mut self, role: VoiceRole) -> bool {
        self.slots[role.index()].take().is_some()
    }

    pub fn stop_all(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Live gain change on the sounding voice, no rebuild
    pub fn set_volume(&mut self, role: VoiceRole, volume: f32) {
        self.settings.volumes.set(role, volume);
        let volume = self.settings.volumes.get(role);
        if let Some(voice) = self.slots[role.index()].as_mut() {
            voice.set_volume(volume);
        }
    }

    /// Switch rendering mode. Every sounding voice is torn down before any
    /// voice of the new mode is built.
    pub fn set_mode(&mut self, mode: SynthMode) {
        if self.settings.mode == mode {
            return;
        }
        let sounding = self.sounding();
        self.stop_all();
        self.settings.mode = mode;
        self.rebuild(&sounding);
        debug!(mode = mode.name(), voices = sounding.len(), "Synth mode switched");
    }

    /// New vowel; formant voices are re-synthesized
    pub fn set_vowel(&mut self, vowel: Vowel) {
        self.settings.vowel = vowel;
        if self.settings.mode == SynthMode::Formant {
            let sounding = self.sounding();
            self.stop_all();
            self.rebuild(&sounding);
        }
    }

    /// Mix every live voice into `out`
    pub fn render(&mut self, out: &mut [f32]) {
        for voice in self.slots.iter_mut().flatten() {
            for sample in out.iter_mut() {
                *sample += voice.tick();
            }
        }
    }

    fn sounding(&self) -> Vec<(VoiceRole, f64)> {
        VoiceRole::ALL
            .into_iter()
            .filter_map(|role| self.voice(role).map(|v| (role, v.frequency_hz())))
            .collect()
    }

    fn rebuild(&mut self, voices: &[(VoiceRole, f64)]) {
        for &(role, frequency_hz) in voices {
            self.render_voice(role, frequency_hz);
        }
    }
}
