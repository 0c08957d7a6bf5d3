//! MIDI note input (alternate pitch source) and harmony output

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use ensemble_core::{Harmony, NoteEvent};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use thiserror::Error;
use tracing::{debug, info, warn};

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;
pub const HARMONY_VELOCITY: u8 = 100;
pub const NOTE_LENGTH: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum MidiError {
    #[error("MIDI init failed: {0}")]
    Init(#[from] midir::InitError),
    #[error("MIDI port not found: {0}")]
    PortNotFound(String),
    #[error("MIDI connect failed: {0}")]
    Connect(String),
    #[error("MIDI send failed: {0}")]
    Send(#[from] midir::SendError),
    #[error("Failed to spawn MIDI thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Note-on with non-zero velocity on any channel
pub fn parse_note_on(message: &[u8]) -> Option<NoteEvent> {
    match message {
        [status, note, velocity, ..] if status & 0xF0 == NOTE_ON && *velocity > 0 && *note < 0x80 => {
            Some(NoteEvent::from_midi(*note as i32))
        }
        _ => None,
    }
}

/// `channel` is 1-based (1..=16)
pub fn note_on(channel: u8, note: u8, velocity: u8) -> [u8; 3] {
    [NOTE_ON | (channel.clamp(1, 16) - 1), note & 0x7F, velocity & 0x7F]
}

pub fn note_off(channel: u8, note: u8) -> [u8; 3] {
    [NOTE_OFF | (channel.clamp(1, 16) - 1), note & 0x7F, 0]
}

/// One note-on per voice, bass on channel 1 up to soprano on channel 4.
/// Voices outside the MIDI range are skipped.
pub fn harmony_messages(harmony: &Harmony) -> Vec<[u8; 3]> {
    harmony
        .iter()
        .enumerate()
        .filter(|(_, voice)| (0..=127).contains(&voice.midi_number))
        .map(|(i, voice)| note_on(i as u8 + 1, voice.midi_number as u8, HARMONY_VELOCITY))
        .collect()
}

fn matching_port<T: midir::MidiIO>(io: &T, name: &str) -> Option<T::Port> {
    io.ports()
        .into_iter()
        .find(|port| io.port_name(port).is_ok_and(|n| n.contains(name)))
}

pub fn list_input_ports() -> Result<Vec<String>, MidiError> {
    let midi_in = MidiInput::new("ensemble-scan")?;
    Ok(midi_in.ports().iter().filter_map(|p| midi_in.port_name(p).ok()).collect())
}

pub fn list_output_ports() -> Result<Vec<String>, MidiError> {
    let midi_out = MidiOutput::new("ensemble-scan")?;
    Ok(midi_out.ports().iter().filter_map(|p| midi_out.port_name(p).ok()).collect())
}

// ============================================================================
// Input
// ============================================================================

/// Connected MIDI input forwarding note-ons as [`NoteEvent`]s
pub struct MidiNoteInput {
    port_name: String,
    _connection: MidiInputConnection<()>,
}

impl MidiNoteInput {
    /// Connect to the first port whose name contains `name`
    pub fn connect(name: &str, notes: Sender<NoteEvent>) -> Result<Self, MidiError> {
        let mut midi_in = MidiInput::new("ensemble-input")?;
        midi_in.ignore(Ignore::Sysex | Ignore::Time | Ignore::ActiveSense);

        let port = matching_port(&midi_in, name).ok_or_else(|| MidiError::PortNotFound(name.to_string()))?;
        let port_name = midi_in.port_name(&port).unwrap_or_else(|_| name.to_string());

        let connection = midi_in
            .connect(
                &port,
                "ensemble-notes",
                move |_, message, _| {
                    if let Some(note) = parse_note_on(message) {
                        let _ = notes.try_send(note);
                    }
                },
                (),
            )
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        info!(port = %port_name, "MIDI input connected");
        Ok(Self {
            port_name,
            _connection: connection,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

// ============================================================================
// Output
// ============================================================================

struct PendingOff {
    due: Instant,
    /// Note-off with the generation of the note-on it ends
    messages: Vec<([u8; 3], u64)>,
}

/// Latest note-on generation per (channel, note).
///
/// A note re-sent before its previous note-off is due bumps the generation,
/// so the stale off is dropped instead of cutting the new note short.
#[derive(Debug, Default)]
struct NoteOffLedger {
    sounding: HashMap<(u8, u8), u64>,
    next: u64,
}

impl NoteOffLedger {
    /// Record a note-on; returns the generation its note-off must carry
    fn sound(&mut self, on: &[u8; 3]) -> u64 {
        self.next += 1;
        self.sounding.insert((on[0] & 0x0F, on[1]), self.next);
        self.next
    }

    /// Whether `off` still ends the latest note-on for its key
    fn release(&mut self, off: &[u8; 3], generation: u64) -> bool {
        let key = (off[0] & 0x0F, off[1]);
        if self.sounding.get(&key) == Some(&generation) {
            self.sounding.remove(&key);
            true
        } else {
            false
        }
    }
}

/// Sends each harmony as short notes; note-offs follow on a worker thread
pub struct HarmonyMidiOutput {
    port_name: String,
    connection: Arc<Mutex<MidiOutputConnection>>,
    ledger: Arc<Mutex<NoteOffLedger>>,
    offs: Option<Sender<PendingOff>>,
    worker: Option<JoinHandle<()>>,
}

impl HarmonyMidiOutput {
    pub fn connect(name: &str) -> Result<Self, MidiError> {
        let midi_out = MidiOutput::new("ensemble-output")?;
        let port = matching_port(&midi_out, name).ok_or_else(|| MidiError::PortNotFound(name.to_string()))?;
        let port_name = midi_out.port_name(&port).unwrap_or_else(|_| name.to_string());

        let connection = midi_out
            .connect(&port, "ensemble-harmony")
            .map_err(|e| MidiError::Connect(e.to_string()))?;
        let connection = Arc::new(Mutex::new(connection));

        let (offs_tx, offs_rx) = unbounded::<PendingOff>();
        let ledger = Arc::new(Mutex::new(NoteOffLedger::default()));
        let off_connection = connection.clone();
        let off_ledger = ledger.clone();
        let worker = thread::Builder::new().name("ensemble-midi-off".into()).spawn(move || {
            // Offs arrive in due order, so sleeping per batch keeps them on time
            while let Ok(pending) = offs_rx.recv() {
                let wait = pending.due.saturating_duration_since(Instant::now());
                if !wait.is_zero() {
                    thread::sleep(wait);
                }
                // Ledger before connection, the same order as send_harmony
                let Ok(mut ledger) = off_ledger.lock() else {
                    break;
                };
                let Ok(mut conn) = off_connection.lock() else {
                    break;
                };
                for (message, generation) in &pending.messages {
                    if !ledger.release(message, *generation) {
                        continue;
                    }
                    if let Err(e) = conn.send(message) {
                        debug!("MIDI note-off failed: {}", e);
                    }
                }
            }
        })?;

        info!(port = %port_name, "MIDI output connected");
        Ok(Self {
            port_name,
            connection,
            ledger,
            offs: Some(offs_tx),
            worker: Some(worker),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn send_harmony(&self, harmony: &Harmony) -> Result<(), MidiError> {
        let ons = harmony_messages(harmony);
        let mut offs = Vec::with_capacity(ons.len());
        if let (Ok(mut ledger), Ok(mut conn)) = (self.ledger.lock(), self.connection.lock()) {
            for on in &ons {
                conn.send(on)?;
                offs.push((note_off((on[0] & 0x0F) + 1, on[1]), ledger.sound(on)));
            }
        }

        if let Some(tx) = &self.offs {
            let pending = PendingOff {
                due: Instant::now() + NOTE_LENGTH,
                messages: offs,
            };
            if tx.send(pending).is_err() {
                warn!("MIDI note-off worker is gone");
            }
        }
        Ok(())
    }
}

impl Drop for HarmonyMidiOutput {
    fn drop(&mut self) {
        // Flush outstanding note-offs before closing the port
        self.offs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::{generate, PitchClass, Scale, Voicing};

    #[test]
    fn test_parse_note_on() {
        assert_eq!(parse_note_on(&[0x90, 60, 100]).map(|n| n.name()), Some("C4".to_string()));
        assert_eq!(parse_note_on(&[0x93, 69, 1]).map(|n| n.midi_number), Some(69));
        // Velocity zero is a note-off
        assert!(parse_note_on(&[0x90, 60, 0]).is_none());
        assert!(parse_note_on(&[0x80, 60, 64]).is_none());
        assert!(parse_note_on(&[0xB0, 7, 100]).is_none());
        assert!(parse_note_on(&[0x90, 60]).is_none());
    }

    #[test]
    fn test_harmony_channels() {
        let harmony = generate(PitchClass::G, 3, Scale::Major, Voicing::Triad);
        let messages = harmony_messages(&harmony);
        assert_eq!(
            messages,
            vec![[0x90, 55, 100], [0x91, 59, 100], [0x92, 62, 100], [0x93, 67, 100]]
        );
        assert_eq!(note_off(4, 67), [0x83, 67, 0]);
    }

    #[test]
    fn test_out_of_range_voices_skipped() {
        // Bass drops an octave below C-1
        let harmony = generate(PitchClass::C, -1, Scale::Major, Voicing::Satb);
        let messages = harmony_messages(&harmony);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0][0], 0x91);
    }

    #[test]
    fn test_resent_note_keeps_sounding() {
        let mut ledger = NoteOffLedger::default();
        let on = note_on(1, 60, HARMONY_VELOCITY);
        let off = note_off(1, 60);

        let first = ledger.sound(&on);
        let second = ledger.sound(&on);
        let other = ledger.sound(&note_on(2, 60, HARMONY_VELOCITY));

        // The first off is stale once the note was struck again
        assert!(!ledger.release(&off, first));
        assert!(ledger.release(&off, second));
        assert!(!ledger.release(&off, second));
        assert!(ledger.release(&note_off(2, 60), other));
    }
}
