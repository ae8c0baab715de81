// Standard MIDI File input and output for scores.
//
// Writing produces SMF Format 1: a tempo track carrying tempos and time
// signatures, then one track per score track with its name, a program
// change, notes, sustain pedal (CC 64) and pitch bends. Drum tracks go to
// channel 9; other tracks take the remaining channels in turn.
//
// Reading accepts metrical timing only. Every (track, channel) pair with
// notes becomes one score track. Note offs (or note ons with velocity 0)
// close the oldest open note of the same key.
//
// Uses the `midly` crate for parsing and writing.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    num::{u4, u7, u14, u15, u24, u28},
};
use rustc_hash::FxHashMap;

use crate::error::{Result, TokenizerError};
use crate::score::{Note, Pedal, PitchBend, Score, Tempo, TimeSignature, Track};

const DRUM_CHANNEL: u8 = 9;
const SUSTAIN_CONTROLLER: u8 = 64;
const PITCH_BEND_CENTER: i32 = 8192;

/// Write a score to a MIDI file.
pub fn write_midi(score: &Score, path: &Path) -> Result<()> {
    let smf = score_to_smf(score)?;
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    std::fs::write(path, &buf)?;
    Ok(())
}

/// Read a MIDI file into a score.
pub fn read_midi(path: &Path) -> Result<Score> {
    let data = std::fs::read(path)?;
    let smf = Smf::parse(&data)?;
    score_from_smf(&smf)
}

/// Channels for the score's tracks: 9 for drums, 0..=15 minus 9 in turn
/// for the others.
fn assign_channels(tracks: &[Track]) -> Vec<u8> {
    let melodic: Vec<u8> = (0..16).filter(|&c| c != DRUM_CHANNEL).collect();
    let mut next = 0;
    tracks
        .iter()
        .map(|track| {
            if track.is_drum {
                DRUM_CHANNEL
            } else {
                let channel = melodic[next % melodic.len()];
                next += 1;
                channel
            }
        })
        .collect()
}

/// Turn absolute-tick events into a track with delta times. Events at the
/// same tick keep the order of their sort key.
fn to_track<'a>(mut events: Vec<(u32, u8, TrackEventKind<'a>)>) -> Vec<TrackEvent<'a>> {
    events.sort_by_key(|&(tick, order, _)| (tick, order));
    let mut last = 0;
    let mut track: Vec<TrackEvent<'a>> = events
        .into_iter()
        .map(|(tick, _, kind)| {
            let delta = tick - last;
            last = tick;
            TrackEvent {
                delta: u28::new(delta),
                kind,
            }
        })
        .collect();
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}

/// Convert a score to an in-memory SMF borrowing its track names.
pub fn score_to_smf(score: &Score) -> Result<Smf<'_>> {
    let tpb = u16::try_from(score.ticks_per_beat)
        .ok()
        .filter(|&t| t > 0 && t <= 0x7FFF)
        .ok_or_else(|| {
            TokenizerError::Config(format!(
                "{} ticks per beat cannot be written to a MIDI file",
                score.ticks_per_beat
            ))
        })?;
    let mut smf = Smf::new(Header::new(Format::Parallel, Timing::Metrical(u15::new(tpb))));

    // Track 0: tempos and time signatures.
    let mut globals = Vec::new();
    for tempo in &score.tempos {
        let micros = ((60_000_000.0 / tempo.qpm.max(4.0)).round() as u32).min(0xFF_FFFF);
        globals.push((tempo.time, 1, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(micros)))));
    }
    for sig in &score.time_signatures {
        let den_pow = sig.denominator.max(1).trailing_zeros() as u8;
        globals.push((
            sig.time,
            0,
            TrackEventKind::Meta(MetaMessage::TimeSignature(sig.numerator, den_pow, 24, 8)),
        ));
    }
    smf.tracks.push(to_track(globals));

    for (track, channel) in score.tracks.iter().zip(assign_channels(&score.tracks)) {
        let channel = u4::new(channel);
        let midi = |message| TrackEventKind::Midi { channel, message };
        let mut events = vec![
            (0, 0, TrackEventKind::Meta(MetaMessage::TrackName(track.name.as_bytes()))),
            (
                0,
                1,
                midi(MidiMessage::ProgramChange {
                    program: u7::new(track.program.min(127)),
                }),
            ),
        ];
        for note in &track.notes {
            let key = u7::new(note.pitch.min(127));
            events.push((
                note.start,
                6,
                midi(MidiMessage::NoteOn {
                    key,
                    vel: u7::new(note.velocity.clamp(1, 127)),
                }),
            ));
            events.push((note.end(), 2, midi(MidiMessage::NoteOff { key, vel: u7::new(0) })));
        }
        for pedal in &track.pedals {
            let sustain = |value: u8| {
                midi(MidiMessage::Controller {
                    controller: u7::new(SUSTAIN_CONTROLLER),
                    value: u7::new(value),
                })
            };
            events.push((pedal.start, 5, sustain(127)));
            events.push((pedal.end(), 3, sustain(0)));
        }
        for bend in &track.pitch_bends {
            let raw = (bend.value + PITCH_BEND_CENTER).clamp(0, 0x3FFF) as u16;
            events.push((
                bend.time,
                4,
                midi(MidiMessage::PitchBend {
                    bend: midly::PitchBend(u14::new(raw)),
                }),
            ));
        }
        smf.tracks.push(to_track(events));
    }
    Ok(smf)
}

/// Notes, pedals and bends collected for one (track, channel) pair.
#[derive(Default)]
struct ChannelTrack {
    program: u8,
    notes: Vec<Note>,
    pedals: Vec<Pedal>,
    pitch_bends: Vec<PitchBend>,
    open_notes: FxHashMap<u8, VecDeque<(u32, u8)>>,
    pedal_on: Option<u32>,
}

/// Convert a parsed SMF to a score. Timecode-based files are rejected.
pub fn score_from_smf(smf: &Smf<'_>) -> Result<Score> {
    let tpb = match smf.header.timing {
        Timing::Metrical(tpb) => u32::from(tpb.as_int()),
        Timing::Timecode(..) => {
            return Err(TokenizerError::Config(
                "timecode-based MIDI files are not supported".to_string(),
            ));
        }
    };
    let mut score = Score::new(tpb);
    let mut channels: BTreeMap<(usize, u8), ChannelTrack> = BTreeMap::new();
    let mut names: FxHashMap<usize, String> = FxHashMap::default();

    for (ti, track) in smf.tracks.iter().enumerate() {
        let mut tick = 0u32;
        for event in track {
            tick += event.delta.as_int();
            match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let ct = channels.entry((ti, channel.as_int())).or_default();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            ct.open_notes
                                .entry(key.as_int())
                                .or_default()
                                .push_back((tick, vel.as_int()));
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let pitch = key.as_int();
                            if let Some((start, velocity)) = ct
                                .open_notes
                                .get_mut(&pitch)
                                .and_then(VecDeque::pop_front)
                            {
                                if tick > start {
                                    ct.notes.push(Note::new(start, tick - start, pitch, velocity));
                                }
                            }
                        }
                        MidiMessage::ProgramChange { program } => ct.program = program.as_int(),
                        MidiMessage::Controller { controller, value }
                            if controller.as_int() == SUSTAIN_CONTROLLER =>
                        {
                            if value.as_int() >= 64 {
                                ct.pedal_on.get_or_insert(tick);
                            } else if let Some(start) = ct.pedal_on.take() {
                                ct.pedals.push(Pedal {
                                    start,
                                    duration: tick - start,
                                });
                            }
                        }
                        MidiMessage::PitchBend { bend } => ct.pitch_bends.push(PitchBend {
                            time: tick,
                            value: i32::from(bend.0.as_int()) - PITCH_BEND_CENTER,
                        }),
                        _ => {}
                    }
                }
                TrackEventKind::Meta(MetaMessage::Tempo(micros)) if micros.as_int() > 0 => {
                    score.tempos.push(Tempo {
                        time: tick,
                        qpm: 60_000_000.0 / f64::from(micros.as_int()),
                    });
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, den_pow, _, _)) => {
                    score.time_signatures.push(TimeSignature {
                        time: tick,
                        numerator,
                        denominator: 1u8.checked_shl(u32::from(den_pow)).unwrap_or(0),
                    });
                }
                TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                    names.insert(ti, String::from_utf8_lossy(name).into_owned());
                }
                _ => {}
            }
        }
    }

    for ((ti, channel), mut ct) in channels {
        let open: usize = ct.open_notes.values().map(VecDeque::len).sum();
        if open > 0 {
            tracing::warn!(track = ti, channel, open, "dropping notes with no note off");
        }
        if ct.notes.is_empty() {
            continue;
        }
        let program = if channel == DRUM_CHANNEL {
            crate::score::DRUM_PROGRAM
        } else {
            i32::from(ct.program)
        };
        let mut track = Track::for_program(program);
        track.program = ct.program;
        if let Some(name) = names.get(&ti).filter(|n| !n.is_empty()) {
            track.name = name.clone();
        }
        ct.notes.sort_by_key(|n| (n.start, n.pitch));
        track.notes = ct.notes;
        track.pedals = ct.pedals;
        track.pitch_bends = ct.pitch_bends;
        score.tracks.push(track);
    }
    score.tempos.sort_by_key(|t| t.time);
    score.time_signatures.sort_by_key(|t| t.time);
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score() -> Score {
        let mut score = Score::new(480);
        score.tempos.push(Tempo { time: 0, qpm: 120.0 });
        score.time_signatures.push(TimeSignature {
            time: 0,
            numerator: 3,
            denominator: 4,
        });
        let mut piano = Track::for_program(0);
        piano.notes = vec![
            Note::new(0, 480, 60, 100),
            Note::new(480, 480, 60, 90),
            Note::new(480, 960, 64, 80),
        ];
        piano.pedals.push(Pedal { start: 0, duration: 960 });
        piano.pitch_bends.push(PitchBend { time: 240, value: 4096 });
        let mut drums = Track::for_program(-1);
        drums.notes = vec![Note::new(0, 120, 36, 110), Note::new(480, 120, 38, 100)];
        score.tracks = vec![piano, drums];
        score
    }

    #[test]
    fn test_smf_layout() {
        let score = score();
        let smf = score_to_smf(&score).unwrap();
        // Tempo track plus one per score track.
        assert_eq!(smf.tracks.len(), 3);
        assert!(matches!(smf.header.timing, Timing::Metrical(t) if t.as_int() == 480));
        let drum_channel = smf.tracks[2].iter().find_map(|e| match e.kind {
            TrackEventKind::Midi { channel, .. } => Some(channel.as_int()),
            _ => None,
        });
        assert_eq!(drum_channel, Some(DRUM_CHANNEL));
    }

    #[test]
    fn test_round_trip_through_bytes() {
        let score = score();
        let smf = score_to_smf(&score).unwrap();
        let mut buf = Vec::new();
        smf.write_std(&mut buf).unwrap();
        let parsed = Smf::parse(&buf).unwrap();
        let back = score_from_smf(&parsed).unwrap();
        assert_eq!(back, score);
    }

    #[test]
    fn test_channels_skip_drums() {
        let tracks: Vec<Track> = (0..11).map(Track::for_program).collect();
        let channels = assign_channels(&tracks);
        assert!(!channels.contains(&DRUM_CHANNEL));
        assert_eq!(channels[9], 10);
        assert_eq!(channels[10], 11);
    }

    #[test]
    fn test_bad_division_rejected() {
        assert!(matches!(score_to_smf(&Score::new(0)), Err(TokenizerError::Config(_))));
        assert!(matches!(score_to_smf(&Score::new(40_000)), Err(TokenizerError::Config(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("scoretok_midi_{}.mid", std::process::id()));
        let score = score();
        write_midi(&score, &path).unwrap();
        let back = read_midi(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(back.note_count(), score.note_count());
    }
}
