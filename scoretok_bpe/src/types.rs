// Shared aliases and small value types for the merge model.
//
// A `Symbol` is an id in the model's vocabulary: ids below the alphabet size
// are base symbols (one per base token id of the tokenizer), ids above it are
// learned merges in the order they were learned.

use serde::{Deserialize, Serialize};

/// Identifier of a base symbol or a learned merge.
pub type Symbol = u32;

/// Occurrence count of a pair or symbol in the training corpus.
pub type SymbolFreq = u64;

/// Two adjacent symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolPair(pub Symbol, pub Symbol);

/// Which criterion picks the next merge during training, and how sequences
/// are segmented when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    /// Byte-pair encoding: merge the most frequent pair; encode by applying
    /// merges in the order they were learned.
    Bpe,
    /// Unigram-style: merge the pair with the highest likelihood ratio
    /// `count(ab) / (count(a) * count(b))`; encode with a Viterbi search that
    /// maximizes the summed log-probability of the learned pieces.
    Unigram,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Bpe => write!(f, "BPE"),
            ModelKind::Unigram => write!(f, "Unigram"),
        }
    }
}
