// Tokenizer configuration.
//
// One serde struct holds every knob of every scheme: value ranges (pitches,
// velocities, tempos, pitch bends, time signatures), the beat-resolution
// tables for durations and rests, and the feature flags that decide which
// token types exist. Schemes adjust a copy of it when they are built (e.g.
// the fixed-pattern scheme turns off everything it cannot express), and the
// adjusted copy is what gets persisted.
//
// Loaded and saved as JSON. Every field has a default, so a config file only
// needs the fields it changes.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenizerError};
use crate::event::{Event, TokenType};
use crate::time::{BeatRange, TimeValue};

/// Which token grammar a tokenizer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemeKind {
    /// FIFO `NoteOn`/`NoteOff` with `TimeShift` and optional `Rest` tokens.
    MidiLike,
    /// Fixed `TimeShift`, `Pitch`, `Velocity`, `Duration` pattern.
    Structured,
    /// Multi-track wrapper: every track encoded by a base scheme and
    /// delimited by `Track_Start`/`Track_End`.
    Mmm,
}

impl std::fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchemeKind::MidiLike => "MIDILike",
            SchemeKind::Structured => "Structured",
            SchemeKind::Mmm => "MMM",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub scheme: SchemeKind,
    /// Scheme wrapped by `Mmm`. Required for `Mmm`, ignored otherwise.
    pub base_scheme: Option<SchemeKind>,

    /// Pitches `low..high`.
    pub pitch_range: (u8, u8),
    /// Velocity bins spread over 1..=127.
    pub num_velocities: u8,
    /// Resolutions for durations and time shifts.
    pub beat_res: Vec<BeatRange>,
    /// Resolutions for rests.
    pub beat_res_rest: Vec<BeatRange>,
    pub num_tempos: u32,
    /// Tempo bins span `min..=max`, in quarter notes per minute.
    pub tempo_range: (f64, f64),
    /// Allowed time signatures: denominator to numerators.
    pub time_signature_range: BTreeMap<u8, Vec<u8>>,
    /// `(min, max, bins)` for pitch-bend values.
    pub pitch_bend_range: (i32, i32, u32),
    /// Note counts `low..high` that get a `Chord` token.
    pub chord_size_range: (u32, u32),
    /// Program numbers; -1 stands for drums.
    pub programs: Vec<i32>,
    /// Special tokens, as `TYPE` or `Type_Value` (`PAD`, `Track_Start`).
    pub special_tokens: Vec<String>,

    pub use_chords: bool,
    pub use_rests: bool,
    pub use_tempos: bool,
    pub use_time_signatures: bool,
    pub use_sustain_pedals: bool,
    /// Encode pedals as `Pedal` + `Duration` instead of `Pedal`/`PedalOff`.
    pub sustain_pedal_duration: bool,
    pub use_pitch_bends: bool,
    pub use_programs: bool,
    pub use_pitch_intervals: bool,
    /// Emit `Program` only when the program changes instead of before every
    /// note event.
    pub program_changes: bool,
    /// With `use_programs`, tokenize all tracks as one sequence.
    pub one_token_stream_for_programs: bool,
    /// Count a note starting twice on the same pitch and tick as an error
    /// when scoring validity.
    pub remove_duplicated_notes: bool,

    /// Longest note a decoded `NoteOn` may produce. Notes still open at the
    /// end of a sequence get this length.
    pub max_duration: Option<TimeValue>,
    pub max_pitch_interval: u8,
    /// Ticks per beat of decoded scores.
    pub time_division: u32,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        TokenizerConfig {
            scheme: SchemeKind::MidiLike,
            base_scheme: None,
            pitch_range: (21, 109),
            num_velocities: 32,
            beat_res: vec![BeatRange::new(0, 4, 8), BeatRange::new(4, 12, 4)],
            beat_res_rest: vec![
                BeatRange::new(0, 1, 8),
                BeatRange::new(1, 2, 4),
                BeatRange::new(2, 12, 2),
            ],
            num_tempos: 32,
            tempo_range: (40.0, 250.0),
            time_signature_range: BTreeMap::from([
                (8, vec![3, 12, 6]),
                (4, vec![5, 6, 3, 2, 1, 4]),
            ]),
            pitch_bend_range: (-8192, 8191, 32),
            chord_size_range: (3, 6),
            programs: (-1..128).collect(),
            special_tokens: ["PAD", "BOS", "EOS", "MASK"].map(String::from).to_vec(),
            use_chords: false,
            use_rests: false,
            use_tempos: false,
            use_time_signatures: false,
            use_sustain_pedals: false,
            sustain_pedal_duration: false,
            use_pitch_bends: false,
            use_programs: false,
            use_pitch_intervals: false,
            program_changes: false,
            one_token_stream_for_programs: true,
            remove_duplicated_notes: false,
            max_duration: None,
            max_pitch_interval: 16,
            time_division: 480,
        }
    }
}

impl TokenizerConfig {
    pub fn midi_like() -> Self {
        TokenizerConfig::default()
    }

    pub fn structured() -> Self {
        TokenizerConfig {
            scheme: SchemeKind::Structured,
            ..TokenizerConfig::default()
        }
    }

    pub fn mmm(base: SchemeKind) -> Self {
        TokenizerConfig {
            scheme: SchemeKind::Mmm,
            base_scheme: Some(base),
            ..TokenizerConfig::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Whether all tracks share one token sequence.
    pub fn one_token_stream(&self) -> bool {
        self.use_programs && self.one_token_stream_for_programs
    }

    /// Velocity bin values, ascending.
    pub fn velocities(&self) -> Vec<u8> {
        let n = u32::from(self.num_velocities.max(1));
        (1..=n).map(|k| (127 * k / n) as u8).collect()
    }

    /// Tempo bin values, rounded to two decimals.
    pub fn tempos(&self) -> Vec<f64> {
        linspace(self.tempo_range.0, self.tempo_range.1, self.num_tempos)
            .into_iter()
            .map(|t| (t * 100.0).round() / 100.0)
            .collect()
    }

    /// Pitch-bend bin values, ascending.
    pub fn pitch_bends(&self) -> Vec<i32> {
        let (min, max, n) = self.pitch_bend_range;
        linspace(f64::from(min), f64::from(max), n)
            .into_iter()
            .map(|v| v.trunc() as i32)
            .collect()
    }

    /// Allowed `(numerator, denominator)` pairs in vocabulary order.
    pub fn time_signatures(&self) -> Vec<(u8, u8)> {
        self.time_signature_range
            .iter()
            .flat_map(|(&den, nums)| nums.iter().map(move |&num| (num, den)))
            .collect()
    }

    pub fn pitch_in_range(&self, pitch: i32) -> bool {
        pitch >= i32::from(self.pitch_range.0) && pitch < i32::from(self.pitch_range.1)
    }

    /// Special tokens in their full `Type_Value` form.
    pub fn special_token_strings(&self) -> Result<Vec<String>> {
        self.special_tokens
            .iter()
            .map(|raw| {
                let token = if raw.contains('_') {
                    raw.clone()
                } else {
                    format!("{raw}_None")
                };
                match Event::from_token(&token) {
                    Ok(event) if event.kind.is_special() => Ok(token),
                    _ => Err(TokenizerError::UnknownSpecialToken(raw.clone())),
                }
            })
            .collect()
    }

    /// Special token types, for the type graph.
    pub fn special_types(&self) -> Result<Vec<TokenType>> {
        self.special_token_strings()?
            .iter()
            .map(|t| Event::from_token(t).map(|e| e.kind))
            .collect()
    }

    /// Reject configurations no scheme can work with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(TokenizerError::Config(msg));
        let (low, high) = self.pitch_range;
        if low >= high || high > 128 {
            return fail(format!("pitch range {low}..{high} is empty or beyond 127"));
        }
        if self.num_velocities == 0 || self.num_velocities > 127 {
            return fail(format!("num_velocities must be in 1..=127, got {}", self.num_velocities));
        }
        let tables = [("beat_res", &self.beat_res), ("beat_res_rest", &self.beat_res_rest)];
        for (name, ranges) in tables {
            if ranges.is_empty() && name == "beat_res" {
                return fail("beat_res must not be empty".to_string());
            }
            if let Some(r) = ranges.iter().find(|r| r.res == 0 || r.start >= r.end) {
                return fail(format!("{name} has an invalid range {r:?}"));
            }
        }
        if self.use_rests && self.beat_res_rest.is_empty() {
            return fail("use_rests requires beat_res_rest".to_string());
        }
        let (tempo_min, tempo_max) = self.tempo_range;
        if self.use_tempos && (self.num_tempos == 0 || tempo_min <= 0.0 || tempo_min > tempo_max) {
            return fail(format!("invalid tempo bins {:?} x {}", self.tempo_range, self.num_tempos));
        }
        let (bend_min, bend_max, bend_bins) = self.pitch_bend_range;
        if self.use_pitch_bends && (bend_bins == 0 || bend_min > bend_max) {
            return fail(format!("invalid pitch bend range {:?}", self.pitch_bend_range));
        }
        if self.use_chords && self.chord_size_range.0 >= self.chord_size_range.1 {
            return fail(format!("invalid chord size range {:?}", self.chord_size_range));
        }
        if let Some(p) = self.programs.iter().find(|&&p| !(-1..128).contains(&p)) {
            return fail(format!("program {p} is outside -1..=127"));
        }
        if self.use_programs && self.programs.is_empty() {
            return fail("use_programs requires at least one program".to_string());
        }
        if self.time_division == 0 {
            return fail("time_division must be positive".to_string());
        }
        self.special_token_strings()?;
        Ok(())
    }
}

/// `n` evenly spaced values over `min..=max`.
fn linspace(min: f64, max: f64, n: u32) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![min],
        _ => (0..n)
            .map(|i| min + (max - min) * f64::from(i) / f64::from(n - 1))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        TokenizerConfig::default().validate().unwrap();
        assert!(!TokenizerConfig::default().one_token_stream());
    }

    #[test]
    fn test_velocity_bins() {
        let mut config = TokenizerConfig::default();
        let v = config.velocities();
        assert_eq!(v.len(), 32);
        assert_eq!(v.first(), Some(&3));
        assert_eq!(v.last(), Some(&127));
        config.num_velocities = 127;
        assert_eq!(config.velocities(), (1..=127).collect::<Vec<u8>>());
    }

    #[test]
    fn test_tempo_and_bend_bins() {
        let config = TokenizerConfig::default();
        let tempos = config.tempos();
        assert_eq!(tempos.len(), 32);
        assert_eq!(tempos[0], 40.0);
        assert_eq!(tempos[31], 250.0);
        let bends = config.pitch_bends();
        assert_eq!(bends.len(), 32);
        assert_eq!(bends[0], -8192);
        assert_eq!(bends[31], 8191);
    }

    #[test]
    fn test_time_signature_order() {
        let sigs = TokenizerConfig::default().time_signatures();
        assert_eq!(&sigs[..2], &[(5, 4), (6, 4)]);
        assert!(sigs.contains(&(12, 8)));
        assert_eq!(sigs.len(), 9);
    }

    #[test]
    fn test_special_tokens_normalized() {
        let mut config = TokenizerConfig::default();
        config.special_tokens.push("Track_Start".to_string());
        assert_eq!(
            config.special_token_strings().unwrap(),
            vec!["PAD_None", "BOS_None", "EOS_None", "MASK_None", "Track_Start"]
        );
        config.special_tokens.push("SEP".to_string());
        assert!(matches!(
            config.validate(),
            Err(TokenizerError::UnknownSpecialToken(t)) if t == "SEP"
        ));
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let config = TokenizerConfig {
            pitch_range: (60, 60),
            ..TokenizerConfig::default()
        };
        assert!(config.validate().is_err());
        let config = TokenizerConfig {
            programs: vec![0, 200],
            ..TokenizerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_with_partial_input() {
        let json = r#"{"use_rests": true, "max_duration": "4.0.4"}"#;
        let config = TokenizerConfig::from_json(json).unwrap();
        assert!(config.use_rests);
        assert_eq!(config.max_duration, Some(TimeValue::new(4, 0, 4)));
        assert_eq!(config.pitch_range, (21, 109));
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(TokenizerConfig::from_json(&json).unwrap(), config);
    }
}
