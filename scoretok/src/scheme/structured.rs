// Fixed-pattern scheme.
//
// Every note is written as the same succession of token types:
// `TimeShift` -> [`Program`] -> `Pitch` -> `Velocity` -> `Duration`. The
// time shift is always present, `TimeShift_0.0.1` standing for "no time
// passed" between notes sharing an onset. Nothing else (rests, tempos,
// pedals...) can be expressed, which keeps the pattern intact.
//
// Each time shift is a single token, the one closest to the gap. Gaps
// longer than the largest value are clamped, and the cursor only moves by
// what was written, so rounding never accumulates.

use rustc_hash::FxHashSet;

use crate::config::{SchemeKind, TokenizerConfig};
use crate::error::Result;
use crate::event::{Event, TokenType};
use crate::graph::TypeGraph;
use crate::score::{Note, Score, Track};
use crate::time::TimeValue;

use super::{
    Bins, ProgramHint, Scheme, Sink, TrackSet, event_ticks, finish_track, prepare_notes,
    sequence_program, track_supported,
};

#[derive(Debug)]
pub struct Structured {
    config: TokenizerConfig,
    bins: Bins,
}

impl Structured {
    pub fn new(mut config: TokenizerConfig) -> Result<Self> {
        Self::tweak_config(&mut config)?;
        config.validate()?;
        let bins = Bins::new(&config)?;
        Ok(Structured { config, bins })
    }

    /// Note events of `notes` (sorted by onset), with their time shifts.
    fn note_events(&self, notes: &[(Note, i32)], tpb: u32) -> Vec<Event> {
        let mut events = Vec::with_capacity(notes.len() * 5);
        let mut cursor = 0u32;
        for &(note, program) in notes {
            let gap = note.start.saturating_sub(cursor);
            let shift = if gap == 0 {
                Some(TimeValue::ZERO_SHIFT)
            } else {
                self.bins.duration(gap, tpb)
            };
            let Some(shift) = shift else { continue };
            let Some(duration) = self.bins.duration(note.duration, tpb) else {
                continue;
            };
            cursor += shift.ticks(tpb);
            events.push(Event::new(TokenType::TimeShift, shift.to_string(), cursor));
            if self.config.use_programs {
                events.push(Event::new(TokenType::Program, program, cursor));
            }
            events.push(
                Event::new(TokenType::Pitch, i32::from(note.pitch), cursor).with_aux(note.end()),
            );
            events.push(Event::new(TokenType::Velocity, i32::from(note.velocity), cursor));
            events.push(Event::new(TokenType::Duration, duration.to_string(), cursor));
        }
        events
    }

    fn track_notes(&self, track: &Track) -> Vec<(Note, i32)> {
        let program = track.program_id();
        prepare_notes(track, &self.config, &self.bins)
            .into_iter()
            .map(|note| (note, program))
            .collect()
    }
}

impl Scheme for Structured {
    fn tweak_config(config: &mut TokenizerConfig) -> Result<()> {
        config.use_chords = false;
        config.use_rests = false;
        config.use_tempos = false;
        config.use_time_signatures = false;
        config.use_sustain_pedals = false;
        config.sustain_pedal_duration = false;
        config.use_pitch_bends = false;
        config.use_pitch_intervals = false;
        config.program_changes = false;
        Ok(())
    }

    fn kind(&self) -> SchemeKind {
        SchemeKind::Structured
    }

    fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    fn base_vocabulary(&self) -> Vec<String> {
        let (low, high) = self.config.pitch_range;
        let durations = self.bins.durations.values();
        let mut vocab: Vec<String> = (low..high).map(|p| format!("Pitch_{p}")).collect();
        vocab.extend(self.bins.velocities.iter().map(|v| format!("Velocity_{v}")));
        vocab.extend(durations.iter().map(|d| format!("Duration_{d}")));
        vocab.push(format!("TimeShift_{}", TimeValue::ZERO_SHIFT));
        vocab.extend(durations.iter().map(|d| format!("TimeShift_{d}")));
        if self.config.use_programs {
            vocab.extend(self.config.programs.iter().map(|p| format!("Program_{p}")));
        }
        vocab
    }

    fn type_graph(&self) -> TypeGraph {
        let mut graph = TypeGraph::new();
        graph
            .add(TokenType::Pitch, TokenType::Velocity)
            .add(TokenType::Velocity, TokenType::Duration)
            .add(TokenType::Duration, TokenType::TimeShift);
        if self.config.use_programs {
            graph
                .add(TokenType::TimeShift, TokenType::Program)
                .add(TokenType::Program, TokenType::Pitch);
        } else {
            graph.add(TokenType::TimeShift, TokenType::Pitch);
        }
        graph
    }

    fn score_to_events(&self, score: &Score) -> Result<Vec<Vec<Event>>> {
        let tpb = score.ticks_per_beat;
        self.bins.check_division(&self.config, tpb)?;
        let tracks = score
            .tracks
            .iter()
            .filter(|t| track_supported(t, &self.config));

        if self.one_token_stream() {
            let mut notes: Vec<(Note, i32)> = tracks.flat_map(|t| self.track_notes(t)).collect();
            notes.sort_by_key(|(note, _)| note.start);
            return Ok(vec![self.note_events(&notes, tpb)]);
        }

        let sequences: Vec<Vec<Event>> = tracks
            .map(|t| self.note_events(&self.track_notes(t), tpb))
            .collect();
        if sequences.is_empty() {
            return Ok(vec![Vec::new()]);
        }
        Ok(sequences)
    }

    fn events_to_score(
        &self,
        sequences: &[Vec<Event>],
        programs: Option<&[ProgramHint]>,
    ) -> Result<Score> {
        let tpb = self.config.time_division;
        let one_stream = self.one_token_stream();
        let mut score = Score::new(tpb);
        let mut track_set = TrackSet::default();

        for (si, seq) in sequences.iter().enumerate() {
            let mut own_track = if one_stream {
                None
            } else {
                Some(Track::for_program(sequence_program(seq, programs, si)))
            };
            let mut sink = match own_track.as_mut() {
                Some(track) => Sink::Track(track),
                None => Sink::Programs(&mut track_set),
            };
            let mut tick = 0u32;
            let mut program = 0;
            for (ti, event) in seq.iter().enumerate() {
                match event.kind {
                    TokenType::TimeShift => tick += event_ticks(event, tpb).unwrap_or(0),
                    TokenType::Program => {
                        if let Some(p) = event.int_value() {
                            program = p;
                        }
                    }
                    TokenType::Pitch => {
                        if let Some(note) = read_note(&seq[ti..], tick, tpb) {
                            sink.track(program).notes.push(note);
                        }
                    }
                    _ => {}
                }
            }
            if let Some(mut track) = own_track {
                finish_track(&mut track);
                score.tracks.push(track);
            }
        }

        if one_stream {
            score.tracks = track_set.into_tracks();
            score.tracks.iter_mut().for_each(finish_track);
        }
        Ok(score)
    }

    fn count_errors(&self, events: &[Event], graph: &TypeGraph) -> usize {
        let tpb = self.config.time_division;
        let mut errors = 0;
        let mut program = 0;
        let mut pitches_at_tick = FxHashSet::default();
        for (i, event) in events.iter().enumerate() {
            if i > 0 && !graph.allows(events[i - 1].kind, event.kind) {
                errors += 1;
                continue;
            }
            match event.kind {
                TokenType::Pitch => {
                    if self.config.remove_duplicated_notes
                        && !pitches_at_tick.insert((program, event.int_value()))
                    {
                        errors += 1;
                    }
                }
                TokenType::Program => {
                    if let Some(p) = event.int_value() {
                        program = p;
                    }
                }
                TokenType::TimeShift => {
                    if event_ticks(event, tpb).is_some_and(|t| t > 0) {
                        pitches_at_tick.clear();
                    }
                }
                _ => {}
            }
        }
        errors
    }
}

/// Note starting at `events[0]` (a `Pitch`), if the next two events are its
/// `Velocity` and `Duration`.
fn read_note(events: &[Event], tick: u32, tpb: u32) -> Option<Note> {
    let [pitch, velocity, duration, ..] = events else {
        return None;
    };
    if velocity.kind != TokenType::Velocity || duration.kind != TokenType::Duration {
        return None;
    }
    Some(Note::new(
        tick,
        event_ticks(duration, tpb)?,
        u8::try_from(pitch.int_value()?).ok()?,
        u8::try_from(velocity.int_value()?).ok()?,
    ))
}
