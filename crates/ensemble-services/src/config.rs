//! Persisted user settings (`config.toml` under the platform config dir)

use std::path::{Path, PathBuf};

use ensemble_core::pipeline::DEFAULT_CONFIDENCE_GATE;
use ensemble_core::{EstimatorConfig, HarmonySettings, LoopTimeline};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::synth::SynthSettings;

/// Named estimator tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorPreset {
    #[default]
    Standard,
    LowLatency,
}

impl EstimatorPreset {
    pub fn config(&self) -> EstimatorConfig {
        match self {
            Self::Standard => EstimatorConfig::standard(),
            Self::LowLatency => EstimatorConfig::low_latency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub harmony: HarmonySettings,
    pub bpm: f64,
    pub total_bars: u32,
    pub synth: SynthSettings,
    pub estimator: EstimatorPreset,
    /// Minimum estimate confidence before the harmony is regenerated
    pub confidence_gate: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_output: Option<String>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        let timeline = LoopTimeline::default();
        Self {
            harmony: HarmonySettings::default(),
            bpm: timeline.bpm,
            total_bars: timeline.total_bars,
            synth: SynthSettings::default(),
            estimator: EstimatorPreset::default(),
            confidence_gate: DEFAULT_CONFIDENCE_GATE,
            input_device: None,
            midi_input: None,
            midi_output: None,
        }
    }
}

impl EnsembleConfig {
    pub fn timeline(&self) -> LoopTimeline {
        LoopTimeline::new(self.bpm, self.total_bars)
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ensemble")
        .join("config.toml")
}

pub fn load_config() -> EnsembleConfig {
    load_config_from(&config_path())
}

/// Missing or unreadable files yield the defaults
pub fn load_config_from(path: &Path) -> EnsembleConfig {
    let Ok(contents) = std::fs::read_to_string(path) else {
        debug!(path = %path.display(), "No config file, using defaults");
        return EnsembleConfig::default();
    };
    match toml::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), "Ignoring malformed config: {}", e);
            EnsembleConfig::default()
        }
    }
}

pub fn save_config_to(config: &EnsembleConfig, path: &Path) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(s) = toml::to_string_pretty(config) else { return };
    if let Err(e) = std::fs::write(path, s) {
        warn!(path = %path.display(), "Failed to save config: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::SynthMode;
    use ensemble_core::{PitchClass, Scale, Voicing, Vowel};

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EnsembleConfig = toml::from_str(
            r#"
            bpm = 90.0

            [harmony]
            key = "D"
            scale = "minor"
            voicing = "open"

            [synth]
            vowel = "e"
            "#,
        )
        .unwrap();

        assert_eq!(config.bpm, 90.0);
        assert_eq!(config.total_bars, 4);
        assert_eq!(config.harmony.key, PitchClass::D);
        assert_eq!(config.harmony.scale, Scale::Minor);
        assert_eq!(config.harmony.voicing, Voicing::Open);
        assert_eq!(config.synth.vowel, Vowel::E);
        assert_eq!(config.synth.mode, SynthMode::Formant);
        assert_eq!(config.estimator, EstimatorPreset::Standard);
        assert!((config.confidence_gate - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ensemble-config-{}", std::process::id()));
        let path = dir.join("nested").join("config.toml");

        let mut config = EnsembleConfig::default();
        config.bpm = 132.0;
        config.estimator = EstimatorPreset::LowLatency;
        config.synth.mode = SynthMode::Simple;
        config.midi_output = Some("IAC Bus 1".into());
        save_config_to(&config, &path);

        assert_eq!(load_config_from(&path), config);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_or_malformed_file() {
        let dir = std::env::temp_dir().join(format!("ensemble-config-bad-{}", std::process::id()));
        let path = dir.join("config.toml");
        assert_eq!(load_config_from(&path), EnsembleConfig::default());

        let _ = std::fs::create_dir_all(&dir);
        let _ = std::fs::write(&path, "bpm = \"fast\"");
        assert_eq!(load_config_from(&path), EnsembleConfig::default());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_presets() {
        assert_eq!(EstimatorPreset::LowLatency.config().buffer_size, 1024);
        assert_eq!(EnsembleConfig::default().timeline().loop_duration_secs(), 8.0);
    }
}
