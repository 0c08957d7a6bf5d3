//! ensemble-services: Audio devices, real-time engine, MIDI and session layer

pub mod audio_engine;
pub mod audio_input;
pub mod audio_io;
pub mod capture;
pub mod click;
pub mod config;
pub mod export;
pub mod midi;
pub mod playback;
pub mod resample;
pub mod session;
pub mod synth;
pub mod timer;
pub mod transport;

pub use audio_engine::{AudioEngine, AudioEngineError, EngineState};
pub use audio_input::{list_input_devices, AudioInputError, InputDevice, InputStream};
pub use audio_io::{default_output_device, AudioOutputError, OutputDevice, RealtimeOutputStream};
pub use capture::{CaptureError, CaptureEvent, CaptureService, MeterState, RecordedAudio};
pub use click::ClickTrack;
pub use config::{config_path, load_config, EnsembleConfig, EstimatorPreset};
pub use export::{export_mix, export_track, mixdown, ExportError};
pub use midi::{list_input_ports, list_output_ports, HarmonyMidiOutput, MidiError, MidiNoteInput};
pub use playback::PlaybackMixer;
pub use resample::{resample, ResampleError};
pub use session::{Session, SessionError, SessionEvent};
pub use synth::{SynthMode, SynthSettings, VoiceBank, VoiceVolumes};
pub use timer::LookAheadTimer;
pub use transport::{LooperService, MetronomeService};
