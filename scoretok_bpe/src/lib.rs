// Sequence compression for token-id streams.
//
// Learns a merge table over a fixed alphabet of base symbols and uses it to
// compress sequences of base ids into shorter sequences of learned symbols,
// and to expand them back. Two flavors share one training loop:
// frequency-based BPE and a likelihood-ratio unigram model segmented with
// Viterbi search. See `model.rs` for the public entry point.
//
// This crate knows nothing about music or token strings. The tokenizer in
// `scoretok` maps its base vocabulary onto the alphabet (one char per id)
// and hands sequences of base ids to the model.

mod encoder;
pub mod error;
pub mod model;
mod trainer;
pub mod types;

pub use error::ModelError;
pub use model::{CompressionModel, MergeRule, TrainReport};
pub use types::{ModelKind, Symbol, SymbolFreq, SymbolPair};
