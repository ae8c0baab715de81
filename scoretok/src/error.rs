// Error type for tokenizer construction, sequence conversion and persistence.
//
// Malformed token sequences are not errors: decoding skips what it cannot
// use and `Tokenizer::tokens_errors` reports how malformed a sequence is.
// Everything here is fatal for the call that raised it.

use scoretok_bpe::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("time division {time_division} is not divisible by resolution {resolution}")]
    TimeDivision { time_division: u32, resolution: u32 },

    #[error("unknown special token {0:?}")]
    UnknownSpecialToken(String),

    #[error("token {0:?} is not in the vocabulary")]
    UnknownToken(String),

    #[error("id {0} is not in the vocabulary")]
    UnknownId(u32),

    #[error("byte symbol {0:?} is not in the vocabulary")]
    UnknownByte(char),

    #[error("malformed token {0:?}")]
    MalformedToken(String),

    #[error("the tokenizer has no trained compression model")]
    NoModel,

    #[error("incompatible vocabulary: {0}")]
    IncompatibleVocabulary(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("MIDI error: {0}")]
    Midi(#[from] midly::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = TokenizerError> = std::result::Result<T, E>;
