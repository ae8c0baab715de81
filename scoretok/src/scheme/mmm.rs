// Multi-track delimiter scheme ("MMM").
//
// Tracks are tokenized independently by a base scheme (MIDI-like or
// structured), each sequence is wrapped in `Track_Start` / `Track_End`, and
// the wrapped sequences are concatenated into a single stream. Decoding
// splits the stream back at the delimiters and hands the pieces to the base
// scheme. Programs and program changes are forced on so every track names
// its instrument.

use std::ops::Range;

use crate::config::{SchemeKind, TokenizerConfig};
use crate::error::{Result, TokenizerError};
use crate::event::{Event, TokenType};
use crate::graph::TypeGraph;
use crate::score::Score;

use super::{ProgramHint, Scheme};

pub const TRACK_START: &str = "Track_Start";
pub const TRACK_END: &str = "Track_End";

#[derive(Debug)]
pub struct Mmm {
    config: TokenizerConfig,
    base: Box<dyn Scheme>,
}

impl Mmm {
    pub fn new(mut config: TokenizerConfig) -> Result<Self> {
        Self::tweak_config(&mut config)?;
        config.validate()?;
        let mut base_config = config.clone();
        base_config.scheme = config.base_scheme.unwrap_or(SchemeKind::MidiLike);
        base_config.base_scheme = None;
        base_config.one_token_stream_for_programs = false;
        let base = super::build(base_config)?;
        tracing::debug!(base = %base.kind(), "built multi-track base scheme");
        Ok(Mmm { config, base })
    }

    pub fn base(&self) -> &dyn Scheme {
        self.base.as_ref()
    }
}

fn is_track_start(event: &Event) -> bool {
    event.kind == TokenType::Track && event.value.as_text() == Some("Start")
}

fn is_track_end(event: &Event) -> bool {
    event.kind == TokenType::Track && event.value.as_text() == Some("End")
}

/// Index ranges of the tracks of a delimited stream.
///
/// With `keep`, every range starts at its `Track_Start` and runs up to the
/// next one, so the ranges cover the whole stream (anything before the first
/// delimiter goes with the first track). Without it, a range holds only the
/// track's content: from after its `Track_Start` to its `Track_End`, or to
/// the next `Track_Start` when the end is missing. A stream with no
/// `Track_Start` is a single range.
pub(crate) fn track_ranges<T>(
    items: &[T],
    is_start: impl Fn(&T) -> bool,
    is_end: impl Fn(&T) -> bool,
    keep: bool,
) -> Vec<Range<usize>> {
    let starts: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| is_start(item))
        .map(|(i, _)| i)
        .collect();
    if starts.is_empty() {
        return vec![0..items.len()];
    }
    starts
        .iter()
        .enumerate()
        .map(|(k, &start)| {
            let next = starts.get(k + 1).copied().unwrap_or(items.len());
            if keep {
                let start = if k == 0 { 0 } else { start };
                return start..next;
            }
            let end = (start + 1..next)
                .find(|&i| is_end(&items[i]))
                .unwrap_or(next);
            start + 1..end
        })
        .collect()
}

impl Scheme for Mmm {
    fn tweak_config(config: &mut TokenizerConfig) -> Result<()> {
        config.use_programs = true;
        config.program_changes = true;
        config.one_token_stream_for_programs = true;
        match config.base_scheme {
            Some(SchemeKind::MidiLike | SchemeKind::Structured) => {}
            other => {
                return Err(TokenizerError::Config(format!(
                    "the multi-track scheme needs a MIDILike or Structured base, got {other:?}"
                )));
            }
        }
        for token in [TRACK_START, TRACK_END] {
            if !config.special_tokens.iter().any(|t| t == token) {
                config.special_tokens.push(token.to_string());
            }
        }
        Ok(())
    }

    fn kind(&self) -> SchemeKind {
        SchemeKind::Mmm
    }

    fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    fn base_vocabulary(&self) -> Vec<String> {
        self.base.base_vocabulary()
    }

    fn type_graph(&self) -> TypeGraph {
        self.base.type_graph()
    }

    fn score_to_events(&self, score: &Score) -> Result<Vec<Vec<Event>>> {
        if score.tracks.is_empty() {
            return Ok(vec![Vec::new()]);
        }
        let mut stream = Vec::new();
        for track_events in self.base.score_to_events(score)? {
            let end = track_events.last().map_or(1, |e| e.time + 1);
            stream.push(Event::new(TokenType::Track, "Start", 0));
            stream.extend(track_events);
            stream.push(Event::new(TokenType::Track, "End", end));
        }
        Ok(vec![stream])
    }

    fn events_to_score(
        &self,
        sequences: &[Vec<Event>],
        programs: Option<&[ProgramHint]>,
    ) -> Result<Score> {
        let tracks: Vec<Vec<Event>> = sequences
            .iter()
            .flat_map(|seq| {
                track_ranges(seq, is_track_start, is_track_end, false)
                    .into_iter()
                    .map(|range| seq[range].to_vec())
            })
            .collect();
        self.base.events_to_score(&tracks, programs)
    }

    fn count_errors(&self, events: &[Event], graph: &TypeGraph) -> usize {
        if !events.iter().any(is_track_start) {
            return 0;
        }
        track_ranges(events, is_track_start, is_track_end, false)
            .into_iter()
            .map(|range| self.base.count_errors(&events[range], graph))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{Note, Track};

    fn tokens(events: &[Event]) -> Vec<String> {
        events.iter().map(Event::token).collect()
    }

    fn two_track_score() -> Score {
        let mut score = Score::new(480);
        let mut piano = Track::for_program(0);
        piano.notes.push(Note::new(0, 480, 60, 100));
        let mut bass = Track::for_program(33);
        bass.notes.push(Note::new(0, 960, 40, 90));
        score.tracks = vec![piano, bass];
        score
    }

    fn mmm(base: SchemeKind) -> Mmm {
        Mmm::new(TokenizerConfig {
            num_velocities: 127,
            ..TokenizerConfig::mmm(base)
        })
        .unwrap()
    }

    #[test]
    fn test_tracks_are_delimited() {
        let scheme = mmm(SchemeKind::MidiLike);
        let seqs = scheme.score_to_events(&two_track_score()).unwrap();
        assert_eq!(seqs.len(), 1);
        assert_eq!(
            tokens(&seqs[0]),
            vec![
                "Track_Start",
                "Program_0",
                "NoteOn_60",
                "Velocity_100",
                "TimeShift_1.0.8",
                "NoteOff_60",
                "Track_End",
                "Track_Start",
                "Program_33",
                "NoteOn_40",
                "Velocity_90",
                "TimeShift_2.0.8",
                "NoteOff_40",
                "Track_End",
            ]
        );
        assert_eq!(seqs[0][6].time, 481, "Track_End sits one tick after the last event");
    }

    #[test]
    fn test_round_trip_both_bases() {
        for base in [SchemeKind::MidiLike, SchemeKind::Structured] {
            let scheme = mmm(base);
            let score = two_track_score();
            let seqs = scheme.score_to_events(&score).unwrap();
            let graph = scheme.type_graph().with_specials(&scheme.config().special_types().unwrap());
            assert_eq!(scheme.count_errors(&seqs[0], &graph), 0, "{base}");
            let decoded = scheme.events_to_score(&seqs, None).unwrap();
            assert_eq!(decoded.tracks.len(), 2, "{base}");
            assert_eq!(decoded.tracks[0].notes, score.tracks[0].notes, "{base}");
            assert_eq!(decoded.tracks[1].program, 33, "{base}");
            assert_eq!(decoded.tracks[1].notes, score.tracks[1].notes, "{base}");
        }
    }

    #[test]
    fn test_bad_base_rejected() {
        let result = Mmm::new(TokenizerConfig::mmm(SchemeKind::Mmm));
        assert!(matches!(result, Err(TokenizerError::Config(_))));
        let mut config = TokenizerConfig::mmm(SchemeKind::MidiLike);
        config.base_scheme = None;
        assert!(matches!(Mmm::new(config), Err(TokenizerError::Config(_))));
    }

    #[test]
    fn test_delimiters_become_specials() {
        let scheme = mmm(SchemeKind::MidiLike);
        let specials = &scheme.config().special_tokens;
        assert!(specials.iter().any(|t| t == TRACK_START));
        assert!(specials.iter().any(|t| t == TRACK_END));
        assert!(scheme.config().use_programs && scheme.config().program_changes);
        assert!(!scheme.base().one_token_stream());
    }

    #[test]
    fn test_track_ranges() {
        let items = ["x", "S", "a", "b", "E", "S", "c", "E"];
        let start = |s: &&str| *s == "S";
        let end = |s: &&str| *s == "E";
        assert_eq!(track_ranges(&items, start, end, true), vec![0..5, 5..8]);
        assert_eq!(track_ranges(&items, start, end, false), vec![2..4, 6..7]);
        let missing_end = ["S", "a", "S", "b"];
        assert_eq!(track_ranges(&missing_end, start, end, false), vec![1..2, 3..4]);
        assert_eq!(track_ranges(&["a", "b"], start, end, false), vec![0..2]);
    }

    #[test]
    fn test_errors_only_inside_tracks() {
        let scheme = mmm(SchemeKind::MidiLike);
        let graph = scheme.type_graph();
        let mut seq = scheme.score_to_events(&two_track_score()).unwrap().remove(0);
        // An orphan note off between two tracks is outside every span.
        seq.insert(7, Event::new(TokenType::NoteOff, 61, 0));
        assert_eq!(scheme.count_errors(&seq, &graph), 0);
        seq.insert(2, Event::new(TokenType::NoteOff, 61, 0));
        assert_eq!(scheme.count_errors(&seq, &graph), 1);
    }

    #[test]
    fn test_empty_score() {
        let scheme = mmm(SchemeKind::Structured);
        assert_eq!(scheme.score_to_events(&Score::new(480)).unwrap(), vec![Vec::<Event>::new()]);
    }
}
