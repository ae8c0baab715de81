// Shared fixtures for the end-to-end tokenizer tests.
//
// Builds small deterministic scores (piano, bass and drums on a 480-tick
// grid) and tokenizer configurations whose value bins are exact for those
// scores, so a round trip can be compared note for note. Everything here
// goes through the public `scoretok` API; the scenarios live in `tests/`.
//
// See also: `tests/round_trip.rs`, `tests/training.rs`, `tests/multitrack.rs`.

use scoretok::{
    Encoding, Note, ProgramHint, SchemeKind, Score, Tempo, TimeSignature, TokSequence,
    Tokenizer, TokenizerConfig, Track,
};

/// Ticks per beat of every fixture score. Matches the default decode
/// division, so decoded ticks compare directly.
pub const TPB: u32 = 480;

const EIGHTH: u32 = TPB / 2;

/// Eight bars of a broken chord, shifted up by `transpose` semitones.
pub fn piano_track(transpose: u8) -> Track {
    let mut track = Track::for_program(0);
    let pattern = [60, 64, 67, 72, 67, 64];
    for bar in 0..8u32 {
        for (i, &pitch) in pattern.iter().enumerate() {
            let start = bar * 4 * TPB + i as u32 * EIGHTH;
            track
                .notes
                .push(Note::new(start, EIGHTH, pitch + transpose, 80 + (i as u8) * 4));
        }
    }
    track
}

/// Half-note bass line.
pub fn bass_track(transpose: u8) -> Track {
    let mut track = Track::for_program(33);
    for (k, &pitch) in [40u8, 43, 45, 43, 40, 47, 45, 43].iter().enumerate() {
        track
            .notes
            .push(Note::new(k as u32 * 2 * TPB, 2 * TPB, pitch + transpose, 90));
    }
    track
}

/// Kick, snare and hi-hat on a fixed two-beat loop.
pub fn drum_track() -> Track {
    let mut track = Track::for_program(-1);
    for beat in (0..16u32).step_by(2) {
        let t = beat * TPB;
        track.notes.push(Note::new(t, EIGHTH, 35, 110));
        track.notes.push(Note::new(t + EIGHTH, EIGHTH, 42, 70));
        track.notes.push(Note::new(t + TPB, EIGHTH, 38, 100));
        track.notes.push(Note::new(t + TPB + EIGHTH, EIGHTH, 42, 70));
    }
    track
}

/// Piano, bass and drums with a tempo and a time signature.
pub fn band_score() -> Score {
    let mut score = Score::new(TPB);
    score.tracks = vec![piano_track(0), bass_track(0), drum_track()];
    score.tempos.push(Tempo { time: 0, qpm: 120.0 });
    score.time_signatures.push(TimeSignature {
        time: 0,
        numerator: 4,
        denominator: 4,
    });
    score
}

/// `n` variations of the band score, transposed by up to a fifth.
pub fn corpus_scores(n: usize) -> Vec<Score> {
    (0..n)
        .map(|i| {
            let transpose = (i % 8) as u8;
            let mut score = band_score();
            score.tracks = vec![piano_track(transpose), bass_track(transpose), drum_track()];
            score
        })
        .collect()
}

/// A configuration with one velocity bin per MIDI velocity, so note
/// velocities survive a round trip unchanged.
pub fn exact_config(scheme: SchemeKind) -> TokenizerConfig {
    let base = match scheme {
        SchemeKind::MidiLike => TokenizerConfig::midi_like(),
        SchemeKind::Structured => TokenizerConfig::structured(),
        SchemeKind::Mmm => TokenizerConfig::mmm(SchemeKind::MidiLike),
    };
    TokenizerConfig {
        num_velocities: 127,
        ..base
    }
}

/// Same as `exact_config`, with all tracks in one program-tagged stream.
pub fn one_stream_config() -> TokenizerConfig {
    TokenizerConfig {
        use_programs: true,
        one_token_stream_for_programs: true,
        ..exact_config(SchemeKind::MidiLike)
    }
}

pub fn tokenizer(config: TokenizerConfig) -> Tokenizer {
    Tokenizer::new(config).expect("tokenizer config rejected")
}

/// Program hints for decoding the per-track sequences of a score.
pub fn program_hints(score: &Score) -> Vec<ProgramHint> {
    score
        .tracks
        .iter()
        .map(|t| (i32::from(t.program), t.is_drum))
        .collect()
}

/// Tracks as `(program id, sorted notes)`, ordered by program id, so scores
/// decoded in a different track order still compare equal.
pub fn tracks_by_program(score: &Score) -> Vec<(i32, Vec<Note>)> {
    let mut tracks: Vec<(i32, Vec<Note>)> = score
        .tracks
        .iter()
        .map(|t| {
            let mut notes = t.notes.clone();
            notes.sort_by_key(|n| (n.start, n.pitch, n.duration));
            (t.program_id(), notes)
        })
        .collect();
    tracks.sort_by_key(|(program, _)| *program);
    tracks
}

/// Encode a batch of scores and flatten the results into one corpus.
pub fn encode_corpus(tokenizer: &Tokenizer, scores: &[Score]) -> Vec<TokSequence> {
    tokenizer
        .encode_batch(scores)
        .expect("encoding the corpus failed")
        .into_iter()
        .flat_map(Encoding::into_sequences)
        .collect()
}
