// FIFO note-on/note-off scheme ("MIDI-like").
//
// Each note becomes `NoteOn` + `Velocity` at its onset and `NoteOff` at its
// end, with `TimeShift` (and optionally `Rest`) tokens moving time forward
// in between. Decoding pairs every `NoteOff` with the oldest open `NoteOn`
// of the same program and pitch.
//
// Encoding collects small groups of events (a note onset with its optional
// `Program`/`Chord` prefix and `Velocity`, a note off, a pedal, a bend, a
// tempo...) together with a rank, sorts them by (tick, rank), and flattens
// them. The ranks fix the order of simultaneous events: time signature,
// tempo, note offs, pedal offs, pedals, pitch bends, then note onsets. Note
// offs before note onsets keeps a note ending where another of the same
// pitch starts from closing the wrong one.
//
// Optional features: `Program` before each note event (one stream) or only
// on program changes, `Chord_<n>` before notes sharing an onset, relative
// pitches (`PitchIntervalTime` from the previous onset, `PitchIntervalChord`
// from the previous note of the same onset), tempos, time signatures,
// sustain pedals (`Pedal`/`PedalOff` or `Pedal` + `Duration`) and pitch
// bends.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{SmallVec, smallvec};

use crate::config::{SchemeKind, TokenizerConfig};
use crate::error::Result;
use crate::event::{Event, TokenType};
use crate::graph::TypeGraph;
use crate::score::{DRUM_PROGRAM, Note, Pedal, PitchBend, Score, Tempo, TimeSignature, Track};

use super::{
    Bins, ProgramHint, Scheme, Sink, TrackSet, event_ticks, finish_track, global_events,
    parse_time_signature, prepare_notes, sequence_program, tempo_value, time_signature_value,
    track_supported,
};

const RANK_TIME_SIG: u8 = 0;
const RANK_TEMPO: u8 = 1;
const RANK_NOTE_OFF: u8 = 2;
const RANK_PEDAL_OFF: u8 = 3;
const RANK_PEDAL: u8 = 4;
const RANK_PITCH_BEND: u8 = 5;
const RANK_NOTE_ON: u8 = 6;

/// Events that must stay together and in order.
#[derive(Debug)]
struct Group {
    time: u32,
    rank: u8,
    /// Program the events belong to, for program-change insertion. `None`
    /// for global events and pedals.
    program: Option<i32>,
    events: SmallVec<[Event; 4]>,
}

/// Last absolute pitches used to resolve relative pitch tokens.
#[derive(Debug, Default, Clone, Copy)]
struct IntervalState {
    onset: Option<i32>,
    chord: Option<i32>,
}

impl IntervalState {
    /// Absolute pitch of a note-on-class token, updating the state.
    fn resolve(&mut self, kind: TokenType, value: i32) -> Option<i32> {
        let pitch = match kind {
            TokenType::NoteOn => value,
            TokenType::PitchIntervalTime => self.onset? + value,
            TokenType::PitchIntervalChord => self.chord? + value,
            _ => return None,
        };
        if kind != TokenType::PitchIntervalChord {
            self.onset = Some(pitch);
        }
        self.chord = Some(pitch);
        Some(pitch)
    }
}

#[derive(Debug)]
pub struct MidiLike {
    config: TokenizerConfig,
    bins: Bins,
}

impl MidiLike {
    pub fn new(mut config: TokenizerConfig) -> Result<Self> {
        Self::tweak_config(&mut config)?;
        config.validate()?;
        let bins = Bins::new(&config)?;
        Ok(MidiLike { config, bins })
    }

    fn max_duration_ticks(&self, tpb: u32) -> Option<u32> {
        self.config.max_duration.map(|d| d.ticks(tpb))
    }

    /// Collect the event groups of one track.
    fn track_groups(&self, track: &Track, tpb: u32, out: &mut Vec<Group>) {
        let cfg = &self.config;
        let program = track.program_id();
        let prefix_program = cfg.use_programs && !cfg.program_changes;
        let with_prefix = |events: &mut SmallVec<[Event; 4]>, time: u32| {
            if prefix_program {
                events.push(Event::new(TokenType::Program, program, time));
            }
        };

        let notes = prepare_notes(track, cfg, &self.bins);
        for (i, note) in notes.iter().enumerate() {
            let first_of_onset = i == 0 || notes[i - 1].start != note.start;
            if cfg.use_chords && !track.is_drum && first_of_onset {
                let size = notes[i..].iter().take_while(|n| n.start == note.start).count() as u32;
                if (cfg.chord_size_range.0..cfg.chord_size_range.1).contains(&size) {
                    let mut events = SmallVec::new();
                    with_prefix(&mut events, note.start);
                    events.push(Event::new(TokenType::Chord, size as i32, note.start));
                    out.push(Group {
                        time: note.start,
                        rank: RANK_NOTE_ON,
                        program: Some(program),
                        events,
                    });
                }
            }

            // Relative pitches are derived in stream order by `finish_sequence`.
            let pitch = i32::from(note.pitch);
            let mut on = SmallVec::new();
            with_prefix(&mut on, note.start);
            on.push(Event::new(TokenType::NoteOn, pitch, note.start).with_aux(note.end()));
            on.push(Event::new(TokenType::Velocity, i32::from(note.velocity), note.start));
            out.push(Group {
                time: note.start,
                rank: RANK_NOTE_ON,
                program: Some(program),
                events: on,
            });

            let mut off = SmallVec::new();
            with_prefix(&mut off, note.end());
            off.push(Event::new(TokenType::NoteOff, pitch, note.end()));
            out.push(Group {
                time: note.end(),
                rank: RANK_NOTE_OFF,
                program: Some(program),
                events: off,
            });
        }

        if cfg.use_sustain_pedals {
            let pedal_value = if cfg.use_programs { program } else { 0 };
            for pedal in track.pedals.iter().filter(|p| p.duration > 0) {
                if cfg.sustain_pedal_duration {
                    let Some(duration) = self.bins.duration(pedal.duration, tpb) else {
                        continue;
                    };
                    out.push(Group {
                        time: pedal.start,
                        rank: RANK_PEDAL,
                        program: None,
                        events: smallvec![
                            Event::new(TokenType::Pedal, pedal_value, pedal.start),
                            Event::new(TokenType::Duration, duration.to_string(), pedal.start),
                        ],
                    });
                } else {
                    out.push(Group {
                        time: pedal.start,
                        rank: RANK_PEDAL,
                        program: None,
                        events: smallvec![Event::new(TokenType::Pedal, pedal_value, pedal.start)],
                    });
                    out.push(Group {
                        time: pedal.end(),
                        rank: RANK_PEDAL_OFF,
                        program: None,
                        events: smallvec![Event::new(
                            TokenType::PedalOff,
                            pedal_value,
                            pedal.end()
                        )],
                    });
                }
            }
        }

        if cfg.use_pitch_bends {
            for bend in &track.pitch_bends {
                let Some(value) = self.bins.pitch_bend(bend.value) else {
                    continue;
                };
                let mut events = SmallVec::new();
                with_prefix(&mut events, bend.time);
                events.push(Event::new(TokenType::PitchBend, value, bend.time));
                out.push(Group {
                    time: bend.time,
                    rank: RANK_PITCH_BEND,
                    program: Some(program),
                    events,
                });
            }
        }
    }

    /// Token for a note's pitch when relative pitches are on. A new onset
    /// is written relative to the previous onset, a note sharing the
    /// previous note's onset relative to that note; anything too far away
    /// falls back to an absolute `NoteOn`.
    fn relative_pitch(
        &self,
        state: &mut IntervalState,
        previous_onset: Option<u32>,
        onset: u32,
        pitch: i32,
    ) -> (TokenType, i32) {
        let max = i32::from(self.config.max_pitch_interval);
        let (kind, reference) = if previous_onset == Some(onset) {
            (TokenType::PitchIntervalChord, state.chord)
        } else {
            (TokenType::PitchIntervalTime, state.onset)
        };
        let (kind, value) = match reference {
            Some(reference) if (pitch - reference).abs() <= max => (kind, pitch - reference),
            _ => (TokenType::NoteOn, pitch),
        };
        state.resolve(kind, value);
        (kind, value)
    }

    fn global_groups(&self, score: &Score) -> Vec<Group> {
        global_events(score, &self.config, &self.bins)
            .into_iter()
            .map(|event| Group {
                time: event.time,
                rank: if event.kind == TokenType::TimeSig {
                    RANK_TIME_SIG
                } else {
                    RANK_TEMPO
                },
                program: None,
                events: smallvec![event],
            })
            .collect()
    }

    /// Sort groups, insert program changes and relative pitches, then time
    /// tokens. Relative pitches follow the merged stream per program, the
    /// order the decoder resolves them in.
    fn finish_sequence(&self, mut groups: Vec<Group>, tpb: u32) -> Vec<Event> {
        groups.sort_by_key(|g| (g.time, g.rank));
        let mut events = Vec::with_capacity(groups.len() * 2);
        let mut current_program = None;
        let mut intervals: FxHashMap<i32, (IntervalState, Option<u32>)> = FxHashMap::default();
        for mut group in groups {
            if self.config.program_changes {
                if let Some(program) = group.program.filter(|&p| Some(p) != current_program) {
                    events.push(Event::new(TokenType::Program, program, group.time));
                    current_program = Some(program);
                }
            }
            let melodic = group.program.filter(|&p| p != DRUM_PROGRAM);
            if let (true, Some(program)) = (self.config.use_pitch_intervals, melodic) {
                let (state, previous_onset) = intervals.entry(program).or_default();
                for event in group.events.iter_mut().filter(|e| e.kind == TokenType::NoteOn) {
                    let Some(pitch) = event.int_value() else { continue };
                    let (kind, value) =
                        self.relative_pitch(state, *previous_onset, event.time, pitch);
                    *previous_onset = Some(event.time);
                    event.kind = kind;
                    event.value = value.into();
                }
            }
            events.extend(group.events);
        }
        self.add_time_events(events, tpb)
    }

    /// Insert `TimeShift` tokens, and `Rest` tokens when enough time passed
    /// since the last note ended.
    fn add_time_events(&self, events: Vec<Event>, tpb: u32) -> Vec<Event> {
        let use_rests = self.config.use_rests;
        let min_rest = self.bins.rests.min_ticks(tpb).max(1);
        let mut out = Vec::with_capacity(events.len() * 2);
        let mut previous_tick = 0u32;
        let mut previous_note_end = 0u32;
        for event in events {
            if event.time > previous_tick {
                if use_rests && event.time.saturating_sub(previous_note_end) >= min_rest {
                    previous_tick = previous_note_end.max(previous_tick);
                    let gap = event.time - previous_tick;
                    for (value, ticks) in self.bins.rests.split_ticks(gap, tpb) {
                        out.push(Event::new(TokenType::Rest, value.to_string(), previous_tick));
                        previous_tick += ticks;
                    }
                }
                if event.time > previous_tick {
                    let gap = event.time - previous_tick;
                    for (value, ticks) in self.bins.durations.split_ticks(gap, tpb) {
                        out.push(Event::new(
                            TokenType::TimeShift,
                            value.to_string(),
                            previous_tick,
                        ));
                        previous_tick += ticks;
                    }
                }
                previous_tick = event.time;
            }
            previous_note_end = previous_note_end.max(event.aux.unwrap_or(event.time));
            out.push(event);
        }
        out
    }
}

impl Scheme for MidiLike {
    fn tweak_config(config: &mut TokenizerConfig) -> Result<()> {
        if !config.use_sustain_pedals {
            config.sustain_pedal_duration = false;
        }
        if !config.use_programs {
            config.program_changes = false;
        }
        Ok(())
    }

    fn kind(&self) -> SchemeKind {
        SchemeKind::MidiLike
    }

    fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    fn base_vocabulary(&self) -> Vec<String> {
        let cfg = &self.config;
        let (low, high) = cfg.pitch_range;
        let mut vocab: Vec<String> = Vec::new();
        vocab.extend((low..high).map(|p| format!("NoteOn_{p}")));
        vocab.extend((low..high).map(|p| format!("NoteOff_{p}")));
        vocab.extend(self.bins.velocities.iter().map(|v| format!("Velocity_{v}")));
        vocab.extend(self.bins.durations.values().iter().map(|d| format!("TimeShift_{d}")));

        if cfg.use_chords {
            let (low, high) = cfg.chord_size_range;
            vocab.extend((low..high).map(|n| format!("Chord_{n}")));
        }
        if cfg.use_rests {
            vocab.extend(self.bins.rests.values().iter().map(|r| format!("Rest_{r}")));
        }
        if cfg.use_tempos {
            vocab.extend(self.bins.tempos.iter().map(|&t| format!("Tempo_{}", tempo_value(t))));
        }
        if cfg.use_programs {
            vocab.extend(cfg.programs.iter().map(|p| format!("Program_{p}")));
        }
        if cfg.use_time_signatures {
            vocab.extend(
                self.bins
                    .time_signatures
                    .iter()
                    .map(|&(n, d)| format!("TimeSig_{}", time_signature_value(n, d))),
            );
        }
        if cfg.use_sustain_pedals {
            let values: Vec<i32> = if cfg.use_programs { cfg.programs.clone() } else { vec![0] };
            vocab.extend(values.iter().map(|p| format!("Pedal_{p}")));
            if !cfg.sustain_pedal_duration {
                vocab.extend(values.iter().map(|p| format!("PedalOff_{p}")));
            }
        }
        if cfg.use_pitch_bends {
            vocab.extend(self.bins.pitch_bends.iter().map(|b| format!("PitchBend_{b}")));
        }
        if cfg.use_pitch_intervals {
            let max = i32::from(cfg.max_pitch_interval);
            for kind in [TokenType::PitchIntervalTime, TokenType::PitchIntervalChord] {
                vocab.extend((-max..=max).map(|i| format!("{kind}_{i}")));
            }
        }
        if cfg.use_sustain_pedals && cfg.sustain_pedal_duration {
            vocab.extend(self.bins.durations.values().iter().map(|d| format!("Duration_{d}")));
        }
        vocab
    }

    fn type_graph(&self) -> TypeGraph {
        build_graph(&self.config)
    }

    fn score_to_events(&self, score: &Score) -> Result<Vec<Vec<Event>>> {
        let tpb = score.ticks_per_beat;
        self.bins.check_division(&self.config, tpb)?;
        let tracks: Vec<&Track> = score
            .tracks
            .iter()
            .filter(|t| track_supported(t, &self.config))
            .collect();

        if self.one_token_stream() {
            let mut groups = self.global_groups(score);
            for track in &tracks {
                self.track_groups(track, tpb, &mut groups);
            }
            return Ok(vec![self.finish_sequence(groups, tpb)]);
        }

        if tracks.is_empty() {
            return Ok(vec![self.finish_sequence(self.global_groups(score), tpb)]);
        }
        Ok(tracks
            .iter()
            .map(|track| {
                let mut groups = self.global_groups(score);
                self.track_groups(track, tpb, &mut groups);
                self.finish_sequence(groups, tpb)
            })
            .collect())
    }

    fn events_to_score(
        &self,
        sequences: &[Vec<Event>],
        programs: Option<&[ProgramHint]>,
    ) -> Result<Score> {
        let tpb = self.config.time_division;
        let one_stream = self.one_token_stream();
        let max_duration = self.max_duration_ticks(tpb);
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
            let mut decoder = Decoder {
                config: &self.config,
                tpb,
                max_duration,
                tick: 0,
                program: 0,
                intervals: FxHashMap::default(),
                active_notes: FxHashMap::default(),
                active_pedals: FxHashMap::default(),
            };
            decoder.run(seq, si == 0, &mut sink, &mut score);
            decoder.flush(&mut sink);
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
        let cfg = &self.config;
        let tpb = cfg.time_division;
        let max_duration = self.max_duration_ticks(tpb);
        let mut errors = 0;
        let mut program = 0;
        let mut intervals: FxHashMap<i32, IntervalState> = FxHashMap::default();
        let mut active: FxHashMap<(i32, i32), u32> = FxHashMap::default();
        let mut onsets_at_tick: FxHashSet<(i32, i32)> = FxHashSet::default();

        for (i, event) in events.iter().enumerate() {
            if i > 0 && !graph.allows(events[i - 1].kind, event.kind) {
                errors += 1;
                continue;
            }
            let value = event.int_value();
            match event.kind {
                kind if kind.is_note_on() => {
                    let state = intervals.entry(program).or_default();
                    let Some(pitch) = value.and_then(|v| state.resolve(kind, v)) else {
                        errors += 1;
                        continue;
                    };
                    *active.entry((program, pitch)).or_default() += 1;
                    if cfg.remove_duplicated_notes && !onsets_at_tick.insert((program, pitch)) {
                        errors += 1;
                        continue;
                    }
                    if let Some(max) = max_duration {
                        let rest = &events[i + 1..];
                        if !note_off_within(rest, program, pitch, max, cfg.use_programs, tpb) {
                            errors += 1;
                        }
                    }
                }
                TokenType::NoteOff => match value.and_then(|p| active.get_mut(&(program, p))) {
                    Some(count) if *count > 0 => *count -= 1,
                    _ => errors += 1,
                },
                TokenType::Program => {
                    if let Some(p) = value {
                        program = p;
                    }
                }
                TokenType::TimeShift | TokenType::Rest => {
                    if event_ticks(event, tpb).is_some_and(|t| t > 0) {
                        onsets_at_tick.clear();
                    }
                }
                _ => {}
            }
        }
        errors
    }
}

/// Whether a `NoteOff` for `pitch` of `program` comes before `max` ticks
/// have passed. With programs, the note off only matches when the program
/// in effect at that point is the note's program.
fn note_off_within(
    events: &[Event],
    program: i32,
    pitch: i32,
    max: u32,
    use_programs: bool,
    tpb: u32,
) -> bool {
    let mut elapsed = 0u32;
    let mut current = program;
    for event in events {
        match event.kind {
            TokenType::NoteOff
                if event.int_value() == Some(pitch) && (!use_programs || current == program) =>
            {
                return true;
            }
            TokenType::TimeShift | TokenType::Rest => {
                elapsed = elapsed.saturating_add(event_ticks(event, tpb).unwrap_or(0));
            }
            TokenType::Program => {
                if let Some(p) = event.int_value() {
                    current = p;
                }
            }
            _ => {}
        }
        if elapsed > max {
            return false;
        }
    }
    // Running off the end of the sequence is not an error.
    true
}

/// Scratch state for decoding one sequence.
struct Decoder<'a> {
    config: &'a TokenizerConfig,
    tpb: u32,
    max_duration: Option<u32>,
    tick: u32,
    program: i32,
    intervals: FxHashMap<i32, IntervalState>,
    /// Open notes per (program, pitch), oldest first: (onset tick, velocity).
    active_notes: FxHashMap<(i32, i32), VecDeque<(u32, u8)>>,
    /// Open pedal onset per program.
    active_pedals: FxHashMap<i32, u32>,
}

impl Decoder<'_> {
    fn run(&mut self, seq: &[Event], keep_globals: bool, sink: &mut Sink<'_>, score: &mut Score) {
        for (ti, event) in seq.iter().enumerate() {
            let value = event.int_value();
            match event.kind {
                TokenType::TimeShift | TokenType::Rest => {
                    self.tick += event_ticks(event, self.tpb).unwrap_or(0);
                }
                kind if kind.is_note_on() => {
                    let program = self.program;
                    let state = self.intervals.entry(program).or_default();
                    let Some(pitch) = value.and_then(|v| state.resolve(kind, v)) else {
                        continue;
                    };
                    let velocity = seq
                        .get(ti + 1)
                        .filter(|next| next.kind == TokenType::Velocity)
                        .and_then(Event::int_value)
                        .and_then(|v| u8::try_from(v).ok());
                    if let Some(velocity) = velocity {
                        self.active_notes
                            .entry((program, pitch))
                            .or_default()
                            .push_back((self.tick, velocity));
                    }
                }
                TokenType::NoteOff => {
                    let Some(pitch) = value else { continue };
                    let program = self.program;
                    let Some((onset, velocity)) = self
                        .active_notes
                        .get_mut(&(program, pitch))
                        .and_then(VecDeque::pop_front)
                    else {
                        continue;
                    };
                    let mut duration = self.tick - onset;
                    if let Some(max) = self.max_duration {
                        duration = duration.min(max);
                    }
                    if let Ok(pitch) = u8::try_from(pitch) {
                        sink.track(program)
                            .notes
                            .push(Note::new(onset, duration, pitch, velocity));
                    }
                }
                TokenType::Program => {
                    if let Some(p) = value {
                        self.program = p;
                    }
                }
                TokenType::Tempo if keep_globals => {
                    if let Some(qpm) = event.value.as_text().and_then(|v| v.parse::<f64>().ok()) {
                        score.tempos.push(Tempo { time: self.tick, qpm });
                    }
                }
                TokenType::TimeSig if keep_globals => {
                    if let Some((numerator, denominator)) =
                        event.value.as_text().and_then(parse_time_signature)
                    {
                        score.time_signatures.push(TimeSignature {
                            time: self.tick,
                            numerator,
                            denominator,
                        });
                    }
                }
                TokenType::Pedal => {
                    let program = if self.config.use_programs {
                        value.unwrap_or(self.program)
                    } else {
                        self.program
                    };
                    if self.config.sustain_pedal_duration {
                        let duration = seq
                            .get(ti + 1)
                            .filter(|next| next.kind == TokenType::Duration)
                            .and_then(|next| event_ticks(next, self.tpb));
                        if let Some(duration) = duration {
                            sink.track(program).pedals.push(Pedal {
                                start: self.tick,
                                duration,
                            });
                        }
                    } else {
                        self.active_pedals.entry(program).or_insert(self.tick);
                    }
                }
                TokenType::PedalOff => {
                    let program = if self.config.use_programs {
                        value.unwrap_or(self.program)
                    } else {
                        self.program
                    };
                    if let Some(start) = self.active_pedals.remove(&program) {
                        sink.track(program).pedals.push(Pedal {
                            start,
                            duration: self.tick - start,
                        });
                    }
                }
                TokenType::PitchBend => {
                    if let Some(v) = value {
                        sink.track(self.program).pitch_bends.push(PitchBend {
                            time: self.tick,
                            value: v,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    /// Close notes still open at the end of the sequence. They last
    /// `max_duration` when one is configured and are dropped otherwise.
    fn flush(&mut self, sink: &mut Sink<'_>) {
        let open: usize = self.active_notes.values().map(VecDeque::len).sum();
        if open == 0 {
            return;
        }
        let Some(max) = self.max_duration else {
            tracing::debug!(open, "dropping notes with no NoteOff");
            self.active_notes.clear();
            return;
        };
        let mut open_notes: Vec<((i32, i32), VecDeque<(u32, u8)>)> =
            self.active_notes.drain().collect();
        open_notes.sort_by_key(|(key, _)| *key);
        for ((program, pitch), queue) in open_notes {
            let Ok(pitch) = u8::try_from(pitch) else {
                continue;
            };
            for (onset, velocity) in queue {
                sink.track(program)
                    .notes
                    .push(Note::new(onset, max, pitch, velocity));
            }
        }
    }
}

/// Allowed token-type successions for a configuration.
pub(crate) fn build_graph(cfg: &TokenizerConfig) -> TypeGraph {
    use TokenType::{
        Chord, Duration, NoteOff, NoteOn, Pedal, PedalOff, PitchBend, PitchIntervalChord,
        PitchIntervalTime, Program, Rest, Tempo, TimeShift, TimeSig, Velocity,
    };

    let mut g = TypeGraph::new();
    // What may start a note: `Program` when every note carries one,
    // otherwise the note-on itself or a relative pitch.
    let first_note: Vec<TokenType> = if cfg.use_programs && !cfg.program_changes {
        vec![Program]
    } else if cfg.use_pitch_intervals {
        vec![NoteOn, PitchIntervalTime, PitchIntervalChord]
    } else {
        vec![NoteOn]
    };
    let intervals: &[TokenType] = if cfg.use_pitch_intervals {
        &[PitchIntervalTime, PitchIntervalChord]
    } else {
        &[]
    };

    g.add(NoteOn, Velocity);
    if cfg.use_programs {
        g.add_all(Program, &[NoteOn, NoteOff]).add_all(Program, intervals);
    }
    g.add_all(Velocity, &first_note).add(Velocity, TimeShift);
    g.add_all(NoteOff, &first_note).add_all(NoteOff, &[NoteOff, TimeShift]);
    g.add_all(TimeShift, &first_note).add_all(TimeShift, &[NoteOff, TimeShift]);
    for &interval in intervals {
        g.add(interval, Velocity);
    }
    if cfg.program_changes {
        g.add(Velocity, Program).add(NoteOff, Program);
    }

    if cfg.use_chords {
        g.add_all(Chord, &first_note);
        g.add(TimeShift, Chord).add(NoteOff, Chord).add(Velocity, Chord);
        if cfg.use_programs {
            g.add(Program, Chord);
        }
        g.add_all(Chord, intervals);
    }

    if cfg.use_tempos {
        g.add(TimeShift, Tempo);
        g.add_all(Tempo, &first_note).add(Tempo, TimeShift);
        if !cfg.use_programs || cfg.program_changes {
            g.add(Tempo, NoteOff);
        }
        if cfg.use_chords {
            g.add(Tempo, Chord);
        }
        if cfg.use_rests {
            g.add(Tempo, Rest);
        }
    }

    if cfg.use_time_signatures {
        g.add(TimeShift, TimeSig);
        g.add_all(TimeSig, &first_note).add(TimeSig, TimeShift);
        if !cfg.use_programs || cfg.program_changes {
            g.add(TimeSig, NoteOff);
        }
        if cfg.use_chords {
            g.add(TimeSig, Chord);
        }
        if cfg.use_rests {
            g.add(TimeSig, Rest);
        }
        if cfg.use_tempos {
            g.add(TimeSig, Tempo);
        }
    }

    if cfg.use_sustain_pedals {
        g.add(TimeShift, Pedal).add(NoteOff, Pedal);
        if cfg.sustain_pedal_duration {
            g.add(Pedal, Duration);
            g.add_all(Duration, &first_note).add_all(Duration, &[NoteOff, TimeShift, Pedal]);
        } else {
            g.add(NoteOff, PedalOff).add(TimeShift, PedalOff);
            g.add_all(PedalOff, &first_note)
                .add_all(PedalOff, &[Pedal, PedalOff, NoteOff, TimeShift]);
            g.add_all(Pedal, &first_note).add_all(Pedal, &[Pedal, NoteOff, TimeShift]);
        }
        if cfg.use_chords {
            g.add(Pedal, Chord);
            if !cfg.sustain_pedal_duration {
                g.add(PedalOff, Chord).add(Chord, PedalOff);
            }
        }
        if cfg.use_rests {
            g.add(Pedal, Rest);
            if !cfg.sustain_pedal_duration {
                g.add(PedalOff, Rest);
            }
        }
        if cfg.use_tempos {
            g.add(Tempo, Pedal);
            if !cfg.sustain_pedal_duration {
                g.add(Tempo, PedalOff);
            }
        }
        if cfg.use_time_signatures {
            g.add(TimeSig, Pedal);
            if !cfg.sustain_pedal_duration {
                g.add(TimeSig, PedalOff);
            }
        }
    }

    if cfg.use_pitch_bends {
        g.add_all(PitchBend, &first_note).add_all(PitchBend, &[NoteOff, TimeShift]);
        if cfg.use_programs && !cfg.program_changes {
            g.add(Program, PitchBend);
        } else {
            g.add(TimeShift, PitchBend).add(NoteOff, PitchBend);
            if cfg.use_tempos {
                g.add(Tempo, PitchBend);
            }
            if cfg.use_time_signatures {
                g.add(TimeSig, PitchBend);
            }
            if cfg.use_sustain_pedals {
                g.add(Pedal, PitchBend);
                if cfg.sustain_pedal_duration {
                    g.add(Duration, PitchBend);
                } else {
                    g.add(PedalOff, PitchBend);
                }
            }
        }
        if cfg.use_chords {
            g.add(PitchBend, Chord);
        }
        if cfg.use_rests {
            g.add(PitchBend, Rest);
        }
    }

    if cfg.use_rests {
        g.add_all(Rest, &first_note).add_all(Rest, &[Rest, TimeShift]);
        g.add(NoteOff, Rest);
        if cfg.use_chords {
            g.add(Rest, Chord);
        }
        if cfg.use_tempos {
            g.add(Rest, Tempo);
        }
        if cfg.use_time_signatures {
            g.add(Rest, TimeSig);
        }
        if cfg.use_sustain_pedals {
            g.add(Rest, Pedal);
            if cfg.sustain_pedal_duration {
                g.add(Duration, Rest);
            } else {
                g.add(Rest, PedalOff);
            }
        }
        if cfg.use_pitch_bends {
            g.add(Rest, PitchBend);
        }
    }

    if cfg.program_changes {
        for kind in [TimeShift, Rest, PitchBend, Pedal, PedalOff, Tempo, TimeSig, Chord, Duration] {
            if g.contains(kind) {
                g.add(Program, kind).add(kind, Program);
            }
        }
    }
    g
}
