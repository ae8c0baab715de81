// Symbolic music tokenizer.
//
// Converts multi-track scores (notes, pedals, pitch bends, tempos, time
// signatures) into sequences of discrete tokens and back, under one of three
// token grammars, and optionally compresses token ids with a trained BPE or
// unigram model from `scoretok_bpe`.
//
// Architecture:
// - score.rs: Score model (tracks of notes, pedals and bends; global tempos
//   and time signatures), General MIDI program names
// - time.rs: Beat-resolution tables and `beats.frac.res` time values
// - event.rs: Token types, event values and the `Type_Value` token form
// - config.rs: `TokenizerConfig`, JSON-loadable, plus value bins
// - vocab.rs: Token/id vocabulary with special tokens first
// - graph.rs: Token-type succession graph used for validity scoring
// - sequence.rs: `TokSequence` with events/tokens/ids/bytes views
// - scheme/: The three grammars (MIDI-like, structured, multi-track
//   delimiter) behind the `Scheme` trait, plus shared helpers
// - tokenizer.rs: The facade: encode/decode, view completion, validity,
//   compression training, params persistence
// - midi.rs: Standard MIDI File input and output via `midly`
//
// Encoding is deterministic: the same score and configuration always give
// the same tokens.

pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod midi;
pub mod scheme;
pub mod score;
pub mod sequence;
pub mod time;
pub mod tokenizer;
pub mod vocab;

pub use config::{SchemeKind, TokenizerConfig};
pub use error::{Result, TokenizerError};
pub use event::{Event, EventValue, TokenType};
pub use graph::TypeGraph;
pub use scheme::{ProgramHint, Scheme};
pub use score::{Note, Pedal, PitchBend, Score, Tempo, TimeSignature, Track};
pub use scoretok_bpe::{CompressionModel, ModelKind, TrainReport};
pub use sequence::TokSequence;
pub use time::{BeatRange, TimeValue};
pub use tokenizer::{Encoding, Tokenizer, TokenizerParams};
pub use vocab::Vocabulary;
