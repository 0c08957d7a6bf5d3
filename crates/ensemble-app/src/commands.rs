//! Console command parsing

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use ensemble_core::{note_to_midi, NoteEvent, PitchClass, Scale, TrackId, VoiceRole, Voicing, Vowel};
use ensemble_services::SynthMode;

pub const HELP: &str = "\
commands:
  play | stop                 start or stop loop playback
  rec                         start recording, or stop and keep the take
  metronome                   toggle the click
  bpm <n> | bars <n>          tempo and loop length
  key <C..B> | scale <major|minor> | voicing <triad|satb|close|open>
  note <C4|60>                harmonize a note without singing it
  silence                     stop the harmony voices
  vowel <a|e|i|o|u|ah> | mode <simple|formant> | volume <role> <0..1>
  tracks | mute <id> | solo <id> | delete <id> | clear | undo | redo
  export <id|mix> <path.wav>
  midi-in <port> | midi-out <port> | devices
  status | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Stop,
    Record,
    Metronome,
    Bpm(f64),
    Bars(u32),
    Key(PitchClass),
    Scale(Scale),
    Voicing(Voicing),
    Note(NoteEvent),
    Silence,
    Vowel(Vowel),
    Mode(SynthMode),
    Volume(VoiceRole, f32),
    Tracks,
    Mute(TrackId),
    Solo(TrackId),
    Delete(TrackId),
    Clear,
    Undo,
    Redo,
    ExportTrack(TrackId, PathBuf),
    ExportMix(PathBuf),
    MidiIn(String),
    MidiOut(String),
    Devices,
    Status,
    Help,
    Quit,
}

/// "C#4", "Bb2" or a MIDI number
pub fn parse_note(text: &str) -> Result<NoteEvent> {
    if let Ok(midi) = text.parse::<i32>() {
        if !(0..=127).contains(&midi) {
            bail!("MIDI note {midi} out of range");
        }
        return Ok(NoteEvent::from_midi(midi));
    }

    let split = text
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .ok_or_else(|| anyhow!("note '{text}' needs an octave"))?;
    let (name, octave) = text.split_at(split);
    let pitch_class = PitchClass::from_name(name).ok_or_else(|| anyhow!("unknown note name '{name}'"))?;
    let octave: i32 = octave.parse().with_context(|| format!("bad octave '{octave}'"))?;
    Ok(NoteEvent::from_midi(note_to_midi(pitch_class, octave)))
}

fn arg<'a>(args: &[&'a str], index: usize, what: &str) -> Result<&'a str> {
    args.get(index).copied().ok_or_else(|| anyhow!("missing {what}"))
}

pub fn parse(line: &str) -> Result<Option<Command>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "play" => Command::Play,
        "stop" => Command::Stop,
        "rec" | "record" => Command::Record,
        "metronome" | "click" => Command::Metronome,
        "bpm" => Command::Bpm(arg(args, 0, "tempo")?.parse().context("tempo must be a number")?),
        "bars" => Command::Bars(arg(args, 0, "bar count")?.parse().context("bar count must be a whole number")?),
        "key" => {
            let name = arg(args, 0, "key")?;
            Command::Key(PitchClass::from_name(name).ok_or_else(|| anyhow!("unknown key '{name}'"))?)
        }
        "scale" => Command::Scale(Scale::from_name(arg(args, 0, "scale")?)),
        "voicing" => Command::Voicing(Voicing::from_name(arg(args, 0, "voicing")?)),
        "note" => Command::Note(parse_note(arg(args, 0, "note")?)?),
        "silence" => Command::Silence,
        "vowel" => Command::Vowel(Vowel::from_name(arg(args, 0, "vowel")?)),
        "mode" => match arg(args, 0, "mode")? {
            "simple" => Command::Mode(SynthMode::Simple),
            "formant" => Command::Mode(SynthMode::Formant),
            other => bail!("unknown mode '{other}'"),
        },
        "volume" => {
            let name = arg(args, 0, "voice")?;
            let role = VoiceRole::from_name(name).ok_or_else(|| anyhow!("unknown voice '{name}'"))?;
            let volume: f32 = arg(args, 1, "volume")?.parse().context("volume must be a number")?;
            Command::Volume(role, volume)
        }
        "tracks" => Command::Tracks,
        "mute" => Command::Mute(TrackId::from(arg(args, 0, "track id")?)),
        "solo" => Command::Solo(TrackId::from(arg(args, 0, "track id")?)),
        "delete" => Command::Delete(TrackId::from(arg(args, 0, "track id")?)),
        "clear" => Command::Clear,
        "undo" => Command::Undo,
        "redo" => Command::Redo,
        "export" => {
            let what = arg(args, 0, "track id or 'mix'")?;
            let path = PathBuf::from(arg(args, 1, "output path")?);
            match what {
                "mix" => Command::ExportMix(path),
                id => Command::ExportTrack(TrackId::from(id), path),
            }
        }
        "midi-in" => Command::MidiIn(args.join(" ")),
        "midi-out" => Command::MidiOut(args.join(" ")),
        "devices" => Command::Devices,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note() {
        assert_eq!(parse_note("C#4").unwrap().midi_number, 61);
        assert_eq!(parse_note("Bb2").unwrap().midi_number, 46);
        assert_eq!(parse_note("c-1").unwrap().midi_number, 0);
        assert_eq!(parse_note("69").unwrap().name(), "A4");
        assert!(parse_note("C").is_err());
        assert!(parse_note("H3").is_err());
        assert!(parse_note("200").is_err());
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("  bpm 96 ").unwrap(), Some(Command::Bpm(96.0)));
        assert_eq!(parse("key F#").unwrap(), Some(Command::Key(PitchClass::new(6))));
        assert_eq!(parse("voicing drop2").unwrap(), Some(Command::Voicing(Voicing::Triad)));
        assert_eq!(
            parse("volume alto 0.8").unwrap(),
            Some(Command::Volume(VoiceRole::Alto, 0.8))
        );
        assert_eq!(
            parse("export mix out.wav").unwrap(),
            Some(Command::ExportMix(PathBuf::from("out.wav")))
        );
        assert_eq!(
            parse("export track-2 t.wav").unwrap(),
            Some(Command::ExportTrack(TrackId::from("track-2"), PathBuf::from("t.wav")))
        );
        assert_eq!(parse("midi-in IAC Bus 1").unwrap(), Some(Command::MidiIn("IAC Bus 1".into())));
        assert_eq!(parse("QUIT").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("bpm").is_err());
        assert!(parse("bpm fast").is_err());
        assert!(parse("mode fm").is_err());
        assert!(parse("volume choir 0.5").is_err());
        assert!(parse("dance").is_err());
    }
}
