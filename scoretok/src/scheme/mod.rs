// Tokenization schemes.
//
// A scheme is one token grammar. Every scheme implements `Scheme`:
// adjust the configuration it was given, list its base vocabulary, build its
// token-type graph, turn a score into event sequences (with time tokens
// already inserted), turn event sequences back into a score, and count the
// errors in a sequence for validity scoring.
//
// Schemes are picked once, from `TokenizerConfig::scheme`, by `build`.
// The multi-track scheme owns a boxed base scheme built the same way.
//
// This module also holds what the schemes share: value bins, note
// preparation (sorting, overlap truncation, velocity snapping), global
// tempo/time-signature events, and the track collector used when decoding.

pub mod midi_like;
pub mod mmm;
pub mod structured;

use std::fmt;

use rustc_hash::FxHashMap;

use crate::config::{SchemeKind, TokenizerConfig};
use crate::error::Result;
use crate::event::{Event, TokenType};
use crate::graph::TypeGraph;
use crate::score::{Note, Score, Track};
use crate::time::{TimeTable, TimeValue};

pub use midi_like::MidiLike;
pub use mmm::Mmm;
pub use structured::Structured;

/// Program hint for decoding one independent sequence: `(program, is_drum)`.
pub type ProgramHint = (i32, bool);

pub trait Scheme: fmt::Debug + Send + Sync {
    /// Adjust a configuration to what this scheme can express. Idempotent.
    fn tweak_config(config: &mut TokenizerConfig) -> Result<()>
    where
        Self: Sized;

    fn kind(&self) -> SchemeKind;

    /// The configuration after `tweak_config`.
    fn config(&self) -> &TokenizerConfig;

    /// Base tokens in id order, special tokens excluded.
    fn base_vocabulary(&self) -> Vec<String>;

    /// Allowed successions of token types, special tokens excluded.
    fn type_graph(&self) -> TypeGraph;

    /// Whether a score becomes one sequence rather than one per track.
    fn one_token_stream(&self) -> bool {
        self.config().one_token_stream()
    }

    /// Tokenize a score. Returns one sequence in one-stream mode, otherwise
    /// one per track (one empty sequence for a score without tracks).
    fn score_to_events(&self, score: &Score) -> Result<Vec<Vec<Event>>>;

    /// Rebuild a score from event sequences, at the configured time
    /// division. `programs` gives the program of each independent sequence.
    fn events_to_score(
        &self,
        sequences: &[Vec<Event>],
        programs: Option<&[ProgramHint]>,
    ) -> Result<Score>;

    /// Number of errors in a sequence, at most one per event.
    fn count_errors(&self, events: &[Event], graph: &TypeGraph) -> usize;
}

/// Build the scheme a configuration asks for.
pub fn build(config: TokenizerConfig) -> Result<Box<dyn Scheme>> {
    Ok(match config.scheme {
        SchemeKind::MidiLike => Box::new(MidiLike::new(config)?),
        SchemeKind::Structured => Box::new(Structured::new(config)?),
        SchemeKind::Mmm => Box::new(Mmm::new(config)?),
    })
}

/// Value bins and time tables derived from a configuration.
#[derive(Debug, Clone)]
pub(crate) struct Bins {
    pub durations: TimeTable,
    pub rests: TimeTable,
    pub velocities: Vec<u8>,
    pub tempos: Vec<f64>,
    pub pitch_bends: Vec<i32>,
    pub time_signatures: Vec<(u8, u8)>,
}

impl Bins {
    pub fn new(config: &TokenizerConfig) -> Result<Self> {
        let bins = Bins {
            durations: TimeTable::new(&config.beat_res),
            rests: TimeTable::new(&config.beat_res_rest),
            velocities: config.velocities(),
            tempos: config.tempos(),
            pitch_bends: config.pitch_bends(),
            time_signatures: config.time_signatures(),
        };
        bins.check_division(config, config.time_division)?;
        Ok(bins)
    }

    /// Fail unless `tpb` can express every time value in use.
    pub fn check_division(&self, config: &TokenizerConfig, tpb: u32) -> Result<()> {
        self.durations.check_division(tpb)?;
        if config.use_rests {
            self.rests.check_division(tpb)?;
        }
        Ok(())
    }

    pub fn velocity(&self, velocity: u8) -> u8 {
        nearest(&self.velocities, f64::from(velocity), f64::from).unwrap_or(velocity)
    }

    pub fn tempo(&self, qpm: f64) -> Option<f64> {
        nearest(&self.tempos, qpm, |t| t)
    }

    pub fn pitch_bend(&self, value: i32) -> Option<i32> {
        nearest(&self.pitch_bends, f64::from(value), f64::from)
    }

    /// Duration value for a single-token length.
    pub fn duration(&self, ticks: u32, tpb: u32) -> Option<TimeValue> {
        self.durations.nearest(ticks, tpb)
    }
}

/// The bin closest to `target`; ties go to the earlier bin.
fn nearest<T: Copy>(bins: &[T], target: f64, key: impl Fn(T) -> f64) -> Option<T> {
    bins.iter()
        .copied()
        .min_by(|&a, &b| (key(a) - target).abs().total_cmp(&(key(b) - target).abs()))
}

pub(crate) fn tempo_value(qpm: f64) -> String {
    format!("{qpm:.2}")
}

pub(crate) fn time_signature_value(numerator: u8, denominator: u8) -> String {
    format!("{numerator}/{denominator}")
}

pub(crate) fn parse_time_signature(value: &str) -> Option<(u8, u8)> {
    let (num, den) = value.split_once('/')?;
    Some((num.parse().ok()?, den.parse().ok()?))
}

/// Ticks of a time-valued event, if its value parses.
pub(crate) fn event_ticks(event: &Event, tpb: u32) -> Option<u32> {
    event
        .value
        .as_text()
        .and_then(|v| v.parse::<TimeValue>().ok())
        .map(|v| v.ticks(tpb))
}

/// Whether a track can be tokenized with the configured programs.
pub(crate) fn track_supported(track: &Track, config: &TokenizerConfig) -> bool {
    let supported = !config.use_programs || config.programs.contains(&track.program_id());
    if !supported {
        tracing::debug!(
            program = track.program_id(),
            "skipping track with a program outside the configured set"
        );
    }
    supported
}

/// Notes of a track ready for tokenization: pitches in range, sorted by
/// onset then pitch, velocities snapped to bins. When a note starts while
/// an earlier note of the same pitch is still sounding, the earlier one is
/// cut at the new onset; notes left with no length are dropped.
pub(crate) fn prepare_notes(track: &Track, config: &TokenizerConfig, bins: &Bins) -> Vec<Note> {
    let mut notes: Vec<Note> = track
        .notes
        .iter()
        .filter(|n| config.pitch_in_range(i32::from(n.pitch)))
        .copied()
        .collect();
    let skipped = track.notes.len() - notes.len();
    if skipped > 0 {
        tracing::debug!(skipped, "dropping notes outside the pitch range");
    }
    notes.sort_by_key(|n| (n.start, n.pitch));

    let mut last_by_pitch: FxHashMap<u8, usize> = FxHashMap::default();
    for i in 0..notes.len() {
        let note = notes[i];
        if let Some(&prev) = last_by_pitch.get(&note.pitch) {
            if notes[prev].end() > note.start {
                notes[prev].duration = note.start - notes[prev].start;
            }
        }
        last_by_pitch.insert(note.pitch, i);
    }
    notes.retain(|n| n.duration > 0);
    for note in &mut notes {
        note.velocity = bins.velocity(note.velocity);
    }
    notes
}

/// Tempo and time-signature events of a score, in time order. Values snap
/// to the configured bins; unsupported time signatures are skipped.
pub(crate) fn global_events(score: &Score, config: &TokenizerConfig, bins: &Bins) -> Vec<Event> {
    let mut events = Vec::new();
    if config.use_time_signatures {
        for sig in &score.time_signatures {
            if bins
                .time_signatures
                .contains(&(sig.numerator, sig.denominator))
            {
                events.push(Event::new(
                    TokenType::TimeSig,
                    time_signature_value(sig.numerator, sig.denominator),
                    sig.time,
                ));
            } else {
                tracing::debug!(
                    numerator = sig.numerator,
                    denominator = sig.denominator,
                    "skipping unsupported time signature"
                );
            }
        }
    }
    if config.use_tempos {
        for tempo in &score.tempos {
            if let Some(qpm) = bins.tempo(tempo.qpm) {
                events.push(Event::new(TokenType::Tempo, tempo_value(qpm), tempo.time));
            }
        }
    }
    events.sort_by_key(|e| e.time);
    events
}

/// Program of an independent sequence: the caller's hint, else the value
/// of its first `Program` token, else 0.
pub(crate) fn sequence_program(
    events: &[Event],
    programs: Option<&[ProgramHint]>,
    index: usize,
) -> i32 {
    if let Some(&(program, is_drum)) = programs.and_then(|p| p.get(index)) {
        return if is_drum { crate::score::DRUM_PROGRAM } else { program };
    }
    events
        .iter()
        .find(|e| e.kind == TokenType::Program)
        .and_then(Event::int_value)
        .unwrap_or(0)
}

/// Tracks of a one-stream decode, created on first use and kept in order
/// of first appearance.
#[derive(Debug, Default)]
pub(crate) struct TrackSet {
    tracks: Vec<Track>,
    by_program: FxHashMap<i32, usize>,
}

impl TrackSet {
    pub fn get(&mut self, program: i32) -> &mut Track {
        let idx = *self.by_program.entry(program).or_insert_with(|| {
            self.tracks.push(Track::for_program(program));
            self.tracks.len() - 1
        });
        &mut self.tracks[idx]
    }

    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks
    }
}

/// Where decoded events go: the single track of an independent sequence,
/// or the per-program tracks of a one-stream decode.
pub(crate) enum Sink<'a> {
    Track(&'a mut Track),
    Programs(&'a mut TrackSet),
}

impl Sink<'_> {
    pub fn track(&mut self, program: i32) -> &mut Track {
        match self {
            Sink::Track(track) => track,
            Sink::Programs(set) => set.get(program),
        }
    }
}

/// Sort decoded events into a stable order.
pub(crate) fn finish_track(track: &mut Track) {
    track.notes.sort_by_key(|n| (n.start, n.pitch, n.duration));
    track.pedals.sort_by_key(|p| p.start);
    track.pitch_bends.sort_by_key(|b| b.time);
}
