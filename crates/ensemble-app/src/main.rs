//! ensemble: real-time vocal harmonizer with a loop recorder

mod commands;

use std::io::BufRead;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use commands::{Command, HELP};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use ensemble_services::{
    config_path, list_input_devices, list_input_ports, list_output_ports, load_config, Session, SessionEvent,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ensemble=debug".parse()?)
                .add_directive("cpal=warn".parse()?),
        )
        .init();

    info!("Starting ensemble");

    let config = load_config();
    let mut session = Session::open(config)?.with_config_path(config_path());
    session.start()?;

    let (lines_tx, lines_rx) = unbounded::<String>();
    thread::Builder::new().name("ensemble-stdin".into()).spawn(move || {
        for line in std::io::stdin().lock().lines().map_while(std::io::Result::ok) {
            if lines_tx.send(line).is_err() {
                break;
            }
        }
    })?;

    println!("{HELP}");
    loop {
        let line = match lines_rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => Some(line),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        for event in session.poll() {
            report(&event);
        }

        let Some(line) = line else { continue };
        match commands::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = execute(&mut session, command) {
                    println!("error: {e:#}");
                }
            }
            Ok(None) => {}
            Err(e) => println!("{e:#}"),
        }
    }

    session.stop();
    info!("Goodbye");
    Ok(())
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::Harmony(update) => {
            let voices: Vec<String> = update.harmony.iter().map(|v| v.note().name()).collect();
            println!("{} -> {}", update.quantized.name(), voices.join(" "));
        }
        SessionEvent::RecordingFull => println!("loop full"),
        SessionEvent::TrackRecorded { id, duration_secs } => println!("recorded {id} ({duration_secs:.2}s)"),
    }
}

fn execute(session: &mut Session, command: Command) -> Result<()> {
    match command {
        Command::Play => {
            if !session.play() {
                println!("nothing to play");
            }
        }
        Command::Stop => session.stop_playback(),
        Command::Record => {
            if session.is_recording() {
                report(&session.stop_recording()?);
            } else {
                session.start_recording()?;
                println!("recording {:.1}s", session.timeline().loop_duration_secs());
            }
        }
        Command::Metronome => {
            let on = session.toggle_metronome();
            println!("metronome {}", if on { "on" } else { "off" });
        }
        Command::Bpm(bpm) => session.set_bpm(bpm)?,
        Command::Bars(bars) => session.set_total_bars(bars)?,
        Command::Key(key) => {
            let mut settings = session.harmony_settings();
            settings.key = key;
            session.set_harmony_settings(settings);
        }
        Command::Scale(scale) => {
            let mut settings = session.harmony_settings();
            settings.scale = scale;
            session.set_harmony_settings(settings);
        }
        Command::Voicing(voicing) => {
            let mut settings = session.harmony_settings();
            settings.voicing = voicing;
            session.set_harmony_settings(settings);
        }
        Command::Note(note) => session.play_note(note),
        Command::Silence => session.silence(),
        Command::Vowel(vowel) => session.set_vowel(vowel),
        Command::Mode(mode) => session.set_mode(mode),
        Command::Volume(role, volume) => session.set_volume(role, volume),
        Command::Tracks => {
            for track in session.tracks() {
                let flags = match (session.is_muted(&track.id), session.is_soloed(&track.id)) {
                    (_, true) => " [S]",
                    (true, false) => " [M]",
                    (false, false) => "",
                };
                let state = if session.is_audible(&track.id) { "" } else { " (silent)" };
                println!("{}  {}  {:.2}s{}{}", track.id, track.name, track.duration_secs(), flags, state);
            }
        }
        Command::Mute(id) => session.toggle_mute(&id),
        Command::Solo(id) => session.toggle_solo(&id),
        Command::Delete(id) => {
            session.delete_track(&id)?;
        }
        Command::Clear => session.clear_tracks(),
        Command::Undo => {
            if !session.undo() {
                println!("nothing to undo");
            }
        }
        Command::Redo => {
            if !session.redo() {
                println!("nothing to redo");
            }
        }
        Command::ExportTrack(id, path) => session.export_track(&id, &path)?,
        Command::ExportMix(path) => session.export_mix(&path)?,
        Command::MidiIn(port) => session.connect_midi_input(&port)?,
        Command::MidiOut(port) => session.connect_midi_output(&port)?,
        Command::Devices => {
            for device in list_input_devices()? {
                let mark = if device.is_default { "*" } else { " " };
                println!("{mark} audio in: {} ({} Hz, {} ch)", device.name, device.sample_rate, device.channels);
            }
            match (list_input_ports(), list_output_ports()) {
                (Ok(inputs), Ok(outputs)) => {
                    inputs.iter().for_each(|p| println!("  midi in:  {p}"));
                    outputs.iter().for_each(|p| println!("  midi out: {p}"));
                }
                (Err(e), _) | (_, Err(e)) => warn!("MIDI unavailable: {}", e),
            }
        }
        Command::Status => {
            let settings = session.harmony_settings();
            let timeline = session.timeline();
            let meter = session.meter();
            let synth = session.config().synth;
            println!(
                "key {} {} / {} | {} bpm, {} bars, bar {} {} | {} ({}) | in peak {:.2} rms {:.2}{}{}",
                settings.key,
                settings.scale.name(),
                settings.voicing.name(),
                timeline.bpm,
                timeline.total_bars,
                session.current_bar(),
                if session.is_playing() { "playing" } else { "stopped" },
                synth.mode.name(),
                synth.vowel.name(),
                meter.peak(),
                meter.rms(),
                if meter.take_clip() { " clip" } else { "" },
                if session.is_recording() { " | recording" } else { "" },
            );
            if let Some(update) = session.last_harmony() {
                println!("last note {}", update.detected.name());
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}
