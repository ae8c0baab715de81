// Token sequences with synchronized views.
//
// A `TokSequence` holds up to four views of the same sequence: structured
// events, token strings, integer ids and a byte string (one symbol char per
// base id). Any populated views describe the same sequence; the tokenizer
// fills in missing views from a present one (`Tokenizer::complete_sequence`).
//
// When `are_ids_encoded` is set the ids are compressed: they are model ids,
// not vocabulary ids, and may be shorter than the other views, which always
// stay at the base level.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::event::Event;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokSequence {
    pub events: Option<Vec<Event>>,
    pub tokens: Option<Vec<String>>,
    pub ids: Option<Vec<u32>>,
    pub bytes: Option<String>,
    pub are_ids_encoded: bool,
}

impl TokSequence {
    pub fn from_events(events: Vec<Event>) -> Self {
        TokSequence {
            events: Some(events),
            ..TokSequence::default()
        }
    }

    pub fn from_tokens(tokens: Vec<String>) -> Self {
        TokSequence {
            tokens: Some(tokens),
            ..TokSequence::default()
        }
    }

    pub fn from_ids(ids: Vec<u32>) -> Self {
        TokSequence {
            ids: Some(ids),
            ..TokSequence::default()
        }
    }

    /// Ids produced by a compression model.
    pub fn from_encoded_ids(ids: Vec<u32>) -> Self {
        TokSequence {
            ids: Some(ids),
            are_ids_encoded: true,
            ..TokSequence::default()
        }
    }

    pub fn from_bytes(bytes: String) -> Self {
        TokSequence {
            bytes: Some(bytes),
            ..TokSequence::default()
        }
    }

    pub fn ids(&self) -> &[u32] {
        self.ids.as_deref().unwrap_or_default()
    }

    pub fn tokens(&self) -> &[String] {
        self.tokens.as_deref().unwrap_or_default()
    }

    pub fn events(&self) -> &[Event] {
        self.events.as_deref().unwrap_or_default()
    }

    /// Length of the first populated view, ids first.
    pub fn len(&self) -> usize {
        if let Some(ids) = &self.ids {
            ids.len()
        } else if let Some(tokens) = &self.tokens {
            tokens.len()
        } else if let Some(events) = &self.events {
            events.len()
        } else {
            self.bytes.as_ref().map_or(0, |b| b.chars().count())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positions `range` of every view. Base-level views are dropped when
    /// the ids are compressed, since positions no longer line up.
    pub fn slice(&self, range: Range<usize>) -> TokSequence {
        let cut = |len: usize| range.start.min(len)..range.end.min(len);
        let base_views = !self.are_ids_encoded;
        TokSequence {
            ids: self.ids.as_ref().map(|v| v[cut(v.len())].to_vec()),
            events: self
                .events
                .as_ref()
                .filter(|_| base_views)
                .map(|v| v[cut(v.len())].to_vec()),
            tokens: self
                .tokens
                .as_ref()
                .filter(|_| base_views)
                .map(|v| v[cut(v.len())].to_vec()),
            bytes: self.bytes.as_ref().filter(|_| base_views).map(|b| {
                let r = cut(b.chars().count());
                b.chars().skip(r.start).take(r.end - r.start).collect()
            }),
            are_ids_encoded: self.are_ids_encoded,
        }
    }

    /// Append `other`, view by view. Views missing on either side are
    /// dropped from the result.
    pub fn concat(&mut self, other: &TokSequence) {
        fn join<T: Clone>(a: &mut Option<Vec<T>>, b: &Option<Vec<T>>) {
            match (a.as_mut(), b) {
                (Some(a), Some(b)) => a.extend_from_slice(b),
                _ => *a = None,
            }
        }
        join(&mut self.events, &other.events);
        join(&mut self.tokens, &other.tokens);
        join(&mut self.ids, &other.ids);
        match (self.bytes.as_mut(), &other.bytes) {
            (Some(a), Some(b)) => a.push_str(b),
            _ => self.bytes = None,
        }
        self.are_ids_encoded |= other.are_ids_encoded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TokenType;

    fn seq() -> TokSequence {
        TokSequence {
            events: Some(vec![
                Event::new(TokenType::NoteOn, 60, 0),
                Event::new(TokenType::Velocity, 100, 0),
                Event::new(TokenType::NoteOff, 60, 480),
            ]),
            tokens: Some(vec!["NoteOn_60".into(), "Velocity_100".into(), "NoteOff_60".into()]),
            ids: Some(vec![5, 6, 7]),
            bytes: Some("&'(".to_string()),
            are_ids_encoded: false,
        }
    }

    #[test]
    fn test_slice_keeps_views_aligned() {
        let s = seq().slice(1..3);
        assert_eq!(s.ids(), &[6, 7]);
        assert_eq!(s.tokens(), &["Velocity_100".to_string(), "NoteOff_60".to_string()]);
        assert_eq!(s.bytes.as_deref(), Some("'("));
        assert_eq!(s.events().len(), 2);
    }

    #[test]
    fn test_slice_out_of_bounds_clamps() {
        let s = seq().slice(2..10);
        assert_eq!(s.ids(), &[7]);
        assert!(seq().slice(5..9).is_empty());
    }

    #[test]
    fn test_slice_encoded_drops_base_views() {
        let mut encoded = seq();
        encoded.are_ids_encoded = true;
        let s = encoded.slice(0..1);
        assert_eq!(s.ids(), &[5]);
        assert!(s.tokens.is_none() && s.events.is_none() && s.bytes.is_none());
    }

    #[test]
    fn test_concat() {
        let mut a = seq().slice(0..1);
        a.concat(&seq().slice(1..3));
        assert_eq!(a, seq());
        let mut b = seq();
        b.concat(&TokSequence::from_ids(vec![1]));
        assert_eq!(b.ids(), &[5, 6, 7, 1]);
        assert!(b.tokens.is_none());
    }
}
