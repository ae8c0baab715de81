// Multi-track streams: delimiting, splitting and track isolation.

use pipeline_tests::{band_score, bass_track, exact_config, tokenizer};
use scoretok::SchemeKind;

#[test]
fn test_split_keep_then_concat_is_identity() {
    let tok = tokenizer(exact_config(SchemeKind::Mmm));
    let encoding = tok.encode(&band_score()).unwrap();
    let seq = &encoding.sequences()[0];

    let parts = tok.split_per_track(seq, true).unwrap();
    assert_eq!(parts.len(), 3);
    let mut joined = parts[0].clone();
    for part in &parts[1..] {
        joined.concat(part);
    }
    assert_eq!(joined.ids(), seq.ids());
    assert_eq!(joined.tokens(), seq.tokens());
}

#[test]
fn test_split_strip_leaves_track_content() {
    let tok = tokenizer(exact_config(SchemeKind::Mmm));
    let encoding = tok.encode(&band_score()).unwrap();
    let parts = tok
        .split_per_track(&encoding.sequences()[0], false)
        .unwrap();
    let firsts: Vec<&str> = parts.iter().map(|p| p.tokens()[0].as_str()).collect();
    assert_eq!(firsts, vec!["Program_0", "Program_33", "Program_-1"]);
    for part in &parts {
        assert!(
            part.tokens().iter().all(|t| !t.starts_with("Track_")),
            "stripped parts carry no delimiters"
        );
    }
}

#[test]
fn test_tracks_tokenize_independently() {
    let tok = tokenizer(exact_config(SchemeKind::Mmm));
    let full = tok.encode(&band_score()).unwrap();
    let mut bass_only = band_score();
    bass_only.tracks = vec![bass_track(0)];
    let alone = tok.encode(&bass_only).unwrap();

    let full_parts = tok.split_per_track(&full.sequences()[0], false).unwrap();
    let alone_parts = tok.split_per_track(&alone.sequences()[0], false).unwrap();
    assert_eq!(
        full_parts[1].tokens(),
        alone_parts[0].tokens(),
        "a track's tokens must not depend on its neighbours"
    );
}

#[test]
fn test_other_schemes_do_not_split() {
    let tok = tokenizer(exact_config(SchemeKind::MidiLike));
    let encoding = tok.encode(&band_score()).unwrap();
    let seq = &encoding.sequences()[0];
    let parts = tok.split_per_track(seq, false).unwrap();
    assert_eq!(parts, vec![seq.clone()]);
}

#[test]
fn test_decode_keeps_track_order() {
    let tok = tokenizer(exact_config(SchemeKind::Mmm));
    let score = band_score();
    let decoded = tok.decode(tok.encode(&score).unwrap().sequences(), None).unwrap();
    let programs: Vec<i32> = decoded.tracks.iter().map(|t| t.program_id()).collect();
    assert_eq!(programs, vec![0, 33, -1]);
}
