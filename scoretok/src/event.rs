// Token types and time-stamped events.
//
// An `Event` is the structured form of one token: a type, a value, the tick
// it happens at, and for note-on-class events the tick the note ends
// (`aux`). Its textual form is `"Type_Value"`, e.g. `NoteOn_60`,
// `TimeShift_1.0.8`, `Track_Start`. Special tokens carry the value `None`
// (`PAD_None`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TokenizerError;

/// Every kind of token any scheme can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TokenType {
    NoteOn,
    NoteOff,
    Pitch,
    Velocity,
    Duration,
    TimeShift,
    Rest,
    Tempo,
    TimeSig,
    Pedal,
    PedalOff,
    PitchBend,
    Program,
    Chord,
    PitchIntervalTime,
    PitchIntervalChord,
    /// Track delimiters of the multi-track scheme (`Track_Start`, `Track_End`).
    Track,
    Pad,
    Bos,
    Eos,
    Mask,
}

impl TokenType {
    pub const SPECIALS: [TokenType; 5] = [
        TokenType::Pad,
        TokenType::Bos,
        TokenType::Eos,
        TokenType::Mask,
        TokenType::Track,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TokenType::NoteOn => "NoteOn",
            TokenType::NoteOff => "NoteOff",
            TokenType::Pitch => "Pitch",
            TokenType::Velocity => "Velocity",
            TokenType::Duration => "Duration",
            TokenType::TimeShift => "TimeShift",
            TokenType::Rest => "Rest",
            TokenType::Tempo => "Tempo",
            TokenType::TimeSig => "TimeSig",
            TokenType::Pedal => "Pedal",
            TokenType::PedalOff => "PedalOff",
            TokenType::PitchBend => "PitchBend",
            TokenType::Program => "Program",
            TokenType::Chord => "Chord",
            TokenType::PitchIntervalTime => "PitchIntervalTime",
            TokenType::PitchIntervalChord => "PitchIntervalChord",
            TokenType::Track => "Track",
            TokenType::Pad => "PAD",
            TokenType::Bos => "BOS",
            TokenType::Eos => "EOS",
            TokenType::Mask => "MASK",
        }
    }

    /// Tokens that open a note in the FIFO scheme.
    pub fn is_note_on(self) -> bool {
        matches!(
            self,
            TokenType::NoteOn | TokenType::PitchIntervalTime | TokenType::PitchIntervalChord
        )
    }

    /// Tokens that move the time cursor forward.
    pub fn is_time_advance(self) -> bool {
        matches!(self, TokenType::TimeShift | TokenType::Rest)
    }

    pub fn is_special(self) -> bool {
        Self::SPECIALS.contains(&self)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = TokenizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NoteOn" => TokenType::NoteOn,
            "NoteOff" => TokenType::NoteOff,
            "Pitch" => TokenType::Pitch,
            "Velocity" => TokenType::Velocity,
            "Duration" => TokenType::Duration,
            "TimeShift" => TokenType::TimeShift,
            "Rest" => TokenType::Rest,
            "Tempo" => TokenType::Tempo,
            "TimeSig" => TokenType::TimeSig,
            "Pedal" => TokenType::Pedal,
            "PedalOff" => TokenType::PedalOff,
            "PitchBend" => TokenType::PitchBend,
            "Program" => TokenType::Program,
            "Chord" => TokenType::Chord,
            "PitchIntervalTime" => TokenType::PitchIntervalTime,
            "PitchIntervalChord" => TokenType::PitchIntervalChord,
            "Track" => TokenType::Track,
            "PAD" => TokenType::Pad,
            "BOS" => TokenType::Bos,
            "EOS" => TokenType::Eos,
            "MASK" => TokenType::Mask,
            _ => return Err(TokenizerError::MalformedToken(s.to_string())),
        })
    }
}

/// Value part of a token. Integers (pitches, velocities, programs, pitch
/// bends, intervals) are kept as numbers; everything else (time values,
/// tempos, time signatures, `Start`, `None`) as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventValue {
    Int(i32),
    Text(String),
}

impl EventValue {
    pub fn parse(s: &str) -> Self {
        match s.parse::<i32>() {
            Ok(v) => EventValue::Int(v),
            Err(_) => EventValue::Text(s.to_string()),
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            EventValue::Int(v) => Some(*v),
            EventValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventValue::Int(_) => None,
            EventValue::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventValue::Int(v) => write!(f, "{v}"),
            EventValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i32> for EventValue {
    fn from(v: i32) -> Self {
        EventValue::Int(v)
    }
}

impl From<&str> for EventValue {
    fn from(s: &str) -> Self {
        EventValue::parse(s)
    }
}

impl From<String> for EventValue {
    fn from(s: String) -> Self {
        EventValue::parse(&s)
    }
}

/// One token in structured form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    pub kind: TokenType,
    pub value: EventValue,
    /// Tick the event happens at. Zero for events parsed back from text.
    pub time: u32,
    /// End tick of the note for note-on-class events.
    pub aux: Option<u32>,
}

impl Event {
    pub fn new(kind: TokenType, value: impl Into<EventValue>, time: u32) -> Self {
        Event {
            kind,
            value: value.into(),
            time,
            aux: None,
        }
    }

    pub fn with_aux(mut self, aux: u32) -> Self {
        self.aux = Some(aux);
        self
    }

    /// Textual form, `"Type_Value"`.
    pub fn token(&self) -> String {
        format!("{}_{}", self.kind, self.value)
    }

    /// Parse `"Type_Value"`. The time is unknown and set to 0.
    pub fn from_token(token: &str) -> Result<Self, TokenizerError> {
        let (kind, value) = token
            .split_once('_')
            .ok_or_else(|| TokenizerError::MalformedToken(token.to_string()))?;
        let kind = kind
            .parse::<TokenType>()
            .map_err(|_| TokenizerError::MalformedToken(token.to_string()))?;
        Ok(Event::new(kind, value, 0))
    }

    pub fn int_value(&self) -> Option<i32> {
        self.value.as_int()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_text_round_trip() {
        for token in [
            "NoteOn_60",
            "TimeShift_1.0.8",
            "PitchBend_-8192",
            "Program_-1",
            "Tempo_120.00",
            "TimeSig_4/4",
            "Track_Start",
            "PAD_None",
        ] {
            let event = Event::from_token(token).unwrap();
            assert_eq!(event.token(), token, "token {token} should survive parsing");
        }
    }

    #[test]
    fn test_integer_values_are_numeric() {
        let event = Event::from_token("PitchIntervalChord_-3").unwrap();
        assert_eq!(event.kind, TokenType::PitchIntervalChord);
        assert_eq!(event.int_value(), Some(-3));
        let event = Event::from_token("Rest_0.4.8").unwrap();
        assert_eq!(event.int_value(), None);
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        assert!(Event::from_token("NoteOn60").is_err());
        assert!(Event::from_token("Banana_3").is_err());
    }

    #[test]
    fn test_type_classes() {
        assert!(TokenType::PitchIntervalTime.is_note_on());
        assert!(!TokenType::NoteOff.is_note_on());
        assert!(TokenType::Rest.is_time_advance());
        assert!(TokenType::Track.is_special());
        assert!(!TokenType::Program.is_special());
    }
}
