// Append-only token vocabulary.
//
// Ids are assigned in insertion order: special tokens first, then the
// scheme's base vocabulary, then anything added later. An id never changes
// once assigned. Each id also has a single-char symbol (its "byte"), which
// is the alphabet the compression model trains on: `id + 33`, skipping the
// UTF-16 surrogate range so every id maps to a valid `char`.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenizerError};

/// First code point used for symbols (after space and control characters).
const SYMBOL_OFFSET: u32 = 33;
const SURROGATE_START: u32 = 0xD800;
const SURROGATE_LEN: u32 = 0x800;

/// Symbol char for an id.
pub fn id_to_symbol(id: u32) -> char {
    let mut code = id + SYMBOL_OFFSET;
    if code >= SURROGATE_START {
        code += SURROGATE_LEN;
    }
    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// Inverse of `id_to_symbol`.
pub fn symbol_to_id(symbol: char) -> Option<u32> {
    let code = u32::from(symbol);
    if code < SYMBOL_OFFSET {
        return None;
    }
    let code = if code >= SURROGATE_START + SURROGATE_LEN {
        code - SURROGATE_LEN
    } else {
        code
    };
    Some(code - SYMBOL_OFFSET)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VocabData {
    tokens: Vec<String>,
    num_special: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "VocabData", into = "VocabData")]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: FxHashMap<String, u32>,
    num_special: usize,
}

impl Vocabulary {
    /// Build from special tokens followed by a base vocabulary. Repeated
    /// tokens keep their first id.
    pub fn new(specials: &[String], base: impl IntoIterator<Item = String>) -> Self {
        let mut vocab = Vocabulary::default();
        for special in specials {
            vocab.push(special.clone());
        }
        vocab.num_special = vocab.len();
        for token in base {
            vocab.push(token);
        }
        vocab
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of special tokens at the start of the vocabulary.
    pub fn num_special(&self) -> usize {
        self.num_special
    }

    pub fn is_special(&self, id: u32) -> bool {
        (id as usize) < self.num_special
    }

    /// Append a token, returning its id. Known tokens keep their id.
    pub fn push(&mut self, token: String) -> u32 {
        if let Some(&id) = self.index.get(&token) {
            return id;
        }
        let id = self.tokens.len() as u32;
        self.index.insert(token.clone(), id);
        self.tokens.push(token);
        id
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.index.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn contains(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    /// Symbol chars for every id, in id order.
    pub fn symbols(&self) -> Vec<char> {
        (0..self.len() as u32).map(id_to_symbol).collect()
    }

    pub fn id_of(&self, token: &str) -> Result<u32> {
        self.id(token)
            .ok_or_else(|| TokenizerError::UnknownToken(token.to_string()))
    }

    pub fn token_of(&self, id: u32) -> Result<&str> {
        self.token(id).ok_or(TokenizerError::UnknownId(id))
    }

    /// Id of a symbol char, checked against the vocabulary.
    pub fn id_of_symbol(&self, symbol: char) -> Result<u32> {
        match symbol_to_id(symbol) {
            Some(id) if (id as usize) < self.len() => Ok(id),
            _ => Err(TokenizerError::UnknownByte(symbol)),
        }
    }
}

impl TryFrom<VocabData> for Vocabulary {
    type Error = TokenizerError;

    fn try_from(data: VocabData) -> Result<Self> {
        if data.num_special > data.tokens.len() {
            return Err(TokenizerError::IncompatibleVocabulary(format!(
                "{} special tokens in a vocabulary of {}",
                data.num_special,
                data.tokens.len()
            )));
        }
        let mut vocab = Vocabulary::default();
        for token in data.tokens {
            let expected = vocab.len() as u32;
            if vocab.push(token.clone()) != expected {
                return Err(TokenizerError::IncompatibleVocabulary(format!(
                    "duplicate token {token:?}"
                )));
            }
        }
        vocab.num_special = data.num_special;
        Ok(vocab)
    }
}

impl From<Vocabulary> for VocabData {
    fn from(vocab: Vocabulary) -> Self {
        VocabData {
            tokens: vocab.tokens,
            num_special: vocab.num_special,
        }
    }
}

impl PartialEq for Vocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.tokens == other.tokens && self.num_special == other.num_special
    }
}

impl Eq for Vocabulary {}

#[cfg(test)]
mod tests {
    use super::*;

    fn specials() -> Vec<String> {
        vec!["PAD_None".to_string(), "BOS_None".to_string()]
    }

    #[test]
    fn test_specials_come_first() {
        let vocab = Vocabulary::new(&specials(), ["NoteOn_60".to_string(), "NoteOn_61".to_string()]);
        assert_eq!(vocab.id("PAD_None"), Some(0));
        assert_eq!(vocab.id("NoteOn_60"), Some(2));
        assert_eq!(vocab.num_special(), 2);
        assert!(vocab.is_special(1));
        assert!(!vocab.is_special(2));
    }

    #[test]
    fn test_push_never_moves_ids() {
        let mut vocab = Vocabulary::new(&specials(), ["A_1".to_string()]);
        let before: Vec<(String, u32)> =
            vocab.tokens().iter().map(|t| (t.clone(), vocab.id(t).unwrap())).collect();
        assert_eq!(vocab.push("B_2".to_string()), 3);
        assert_eq!(vocab.push("A_1".to_string()), 2, "existing token keeps its id");
        for (token, id) in before {
            assert_eq!(vocab.id(&token), Some(id));
        }
    }

    #[test]
    fn test_symbols_skip_surrogates() {
        assert_eq!(id_to_symbol(0), '!');
        let below = SURROGATE_START - SYMBOL_OFFSET - 1;
        for id in [0, 1, 500, below, below + 1, below + 2, 70_000] {
            let symbol = id_to_symbol(id);
            assert_ne!(symbol, char::REPLACEMENT_CHARACTER, "id {id}");
            assert_eq!(symbol_to_id(symbol), Some(id));
        }
    }

    #[test]
    fn test_unknown_lookups() {
        let vocab = Vocabulary::new(&specials(), Vec::new());
        assert!(matches!(vocab.id_of("NoteOn_1"), Err(TokenizerError::UnknownToken(_))));
        assert!(matches!(vocab.token_of(9), Err(TokenizerError::UnknownId(9))));
        assert!(matches!(vocab.id_of_symbol('~'), Err(TokenizerError::UnknownByte('~'))));
    }

    #[test]
    fn test_serde_round_trip() {
        let vocab = Vocabulary::new(&specials(), ["X_1".to_string()]);
        let json = serde_json::to_string(&vocab).unwrap();
        let loaded: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, vocab);
        assert_eq!(loaded.id("X_1"), Some(2));
    }
}
