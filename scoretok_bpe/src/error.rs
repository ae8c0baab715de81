// Errors raised by the merge model.

use thiserror::Error;

use crate::types::Symbol;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("the compression model has not been trained")]
    Untrained,

    #[error("symbol id {id} is outside the model vocabulary (size {vocab_size})")]
    UnknownSymbol { id: Symbol, vocab_size: usize },

    #[error("byte symbol {0:?} is not part of the model alphabet")]
    UnknownByte(char),

    #[error("alphabet mismatch: model expects {expected} base symbols, vocabulary has {found}")]
    AlphabetMismatch { expected: usize, found: usize },

    #[error("duplicate byte symbol {0:?} in alphabet")]
    DuplicateByte(char),

    #[error("target vocabulary size {target} is smaller than the alphabet ({alphabet})")]
    TargetTooSmall { target: usize, alphabet: usize },
}
