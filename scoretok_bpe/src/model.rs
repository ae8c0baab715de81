// The trainable compression model.
//
// A `CompressionModel` owns an alphabet (one `char` per base symbol, i.e. the
// `bytes` view of the tokenizer vocabulary) and an ordered merge table. Each
// merge rule produces a new symbol whose byte string is the concatenation of
// its two parents' byte strings, so every learned symbol expands to exactly
// one sequence of base symbols.
//
// Training is resumable: calling `train_*` again with a larger target first
// replays the existing merges over the new corpus, then continues the same
// selection loop. Because selection is deterministic, training to N then to
// N + k yields the same table as training to N + k in one call.
//
// Persistence goes through `ModelData`, the flat serialized form (alphabet,
// ordered rules with the ids/bytes they produce, unigram log-probabilities).
// Lookup tables are rebuilt on load.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::encoder::{encode_by_rank, encode_viterbi};
use crate::error::ModelError;
use crate::trainer::{Corpus, select_pair};
use crate::types::{ModelKind, Symbol, SymbolFreq, SymbolPair};

/// One learned merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRule {
    pub left: Symbol,
    pub right: Symbol,
    /// Id assigned to the merged symbol.
    pub id: Symbol,
    /// Byte string of the merged symbol (concatenated alphabet chars).
    pub bytes: String,
    /// Weighted occurrences of the pair when it was selected.
    pub count: SymbolFreq,
}

/// Summary of one training call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainReport {
    /// Merges learned by this call.
    pub new_merges: usize,
    /// Vocabulary size after the call.
    pub vocab_size: usize,
    /// Unique sequences in the corpus.
    pub unique_sequences: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelData {
    kind: ModelKind,
    alphabet: String,
    merges: Vec<MergeRule>,
    #[serde(default)]
    log_probs: Vec<f64>,
    trained: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ModelData", into = "ModelData")]
pub struct CompressionModel {
    kind: ModelKind,
    alphabet: Vec<char>,
    merges: Vec<MergeRule>,
    /// Unigram piece log-probabilities, indexed by symbol id. Empty for BPE.
    log_probs: Vec<f64>,
    trained: bool,

    byte_index: FxHashMap<char, Symbol>,
    ranks: FxHashMap<SymbolPair, (usize, Symbol)>,
    /// Base-symbol expansion of each merge, indexed by `id - alphabet.len()`.
    expansions: Vec<Vec<Symbol>>,
    pieces: FxHashMap<Vec<Symbol>, Symbol>,
    max_piece_len: usize,
}

impl CompressionModel {
    /// Create an untrained model over the given alphabet. The alphabet must
    /// hold one distinct char per base symbol, in id order.
    pub fn new(kind: ModelKind, alphabet: Vec<char>) -> Result<Self, ModelError> {
        let mut model = CompressionModel {
            kind,
            alphabet,
            merges: Vec::new(),
            log_probs: Vec::new(),
            trained: false,
            byte_index: FxHashMap::default(),
            ranks: FxHashMap::default(),
            expansions: Vec::new(),
            pieces: FxHashMap::default(),
            max_piece_len: 1,
        };
        model.rebuild_index()?;
        Ok(model)
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Number of base symbols.
    pub fn alphabet_size(&self) -> usize {
        self.alphabet.len()
    }

    pub fn alphabet(&self) -> &[char] {
        &self.alphabet
    }

    /// Base symbols plus learned merges.
    pub fn vocab_size(&self) -> usize {
        self.alphabet.len() + self.merges.len()
    }

    pub fn merges(&self) -> &[MergeRule] {
        &self.merges
    }

    /// Byte string of a symbol, base or merged.
    pub fn symbol_bytes(&self, id: Symbol) -> Option<String> {
        let idx = id as usize;
        if idx < self.alphabet.len() {
            return Some(self.alphabet[idx].to_string());
        }
        self.merges
            .get(idx - self.alphabet.len())
            .map(|rule| rule.bytes.clone())
    }

    /// Base symbols a symbol expands to.
    pub fn expansion(&self, id: Symbol) -> Option<&[Symbol]> {
        let idx = id as usize;
        if idx < self.alphabet.len() {
            return None;
        }
        self.expansions
            .get(idx - self.alphabet.len())
            .map(Vec::as_slice)
    }

    /// Check that this model was trained over `alphabet`.
    pub fn check_alphabet(&self, alphabet: &[char]) -> Result<(), ModelError> {
        if alphabet.len() != self.alphabet.len() {
            return Err(ModelError::AlphabetMismatch {
                expected: self.alphabet.len(),
                found: alphabet.len(),
            });
        }
        if let Some(c) = alphabet
            .iter()
            .zip(&self.alphabet)
            .find_map(|(a, b)| (a != b).then_some(*a))
        {
            return Err(ModelError::UnknownByte(c));
        }
        Ok(())
    }

    /// Convert a byte string of base symbols to ids.
    pub fn bytes_to_ids(&self, bytes: &str) -> Result<Vec<Symbol>, ModelError> {
        bytes
            .chars()
            .map(|c| {
                self.byte_index
                    .get(&c)
                    .copied()
                    .ok_or(ModelError::UnknownByte(c))
            })
            .collect()
    }

    /// Train on byte strings (the `bytes` view of token sequences).
    pub fn train_bytes<S: AsRef<str>>(
        &mut self,
        corpus: &[S],
        target_vocab_size: usize,
    ) -> Result<TrainReport, ModelError> {
        let sequences = corpus
            .iter()
            .map(|s| self.bytes_to_ids(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.train_ids(&sequences, target_vocab_size)
    }

    /// Train on sequences of base-symbol ids until the vocabulary reaches
    /// `target_vocab_size` or no adjacent pair remains.
    pub fn train_ids(
        &mut self,
        corpus: &[Vec<Symbol>],
        target_vocab_size: usize,
    ) -> Result<TrainReport, ModelError> {
        if target_vocab_size < self.alphabet.len() {
            return Err(ModelError::TargetTooSmall {
                target: target_vocab_size,
                alphabet: self.alphabet.len(),
            });
        }
        for seq in corpus {
            self.check_base_ids(seq)?;
        }

        tracing::info!(
            kind = %self.kind,
            sequences = corpus.len(),
            from = self.vocab_size(),
            target = target_vocab_size,
            "training compression model"
        );

        // Replay existing merges so training resumes where it stopped.
        let mut words = Corpus::from_sequences(
            corpus.iter().map(|seq| encode_by_rank(seq, &self.ranks)),
        );

        let mut new_merges = 0;
        while self.vocab_size() < target_vocab_size {
            let pair_counts = words.pair_counts();
            let units = match self.kind {
                ModelKind::Unigram => Some(words.symbol_counts(self.vocab_size())),
                ModelKind::Bpe => None,
            };
            let Some((pair, count)) = select_pair(self.kind, &pair_counts, units.as_deref())
            else {
                tracing::debug!("no pairs left to merge");
                break;
            };
            let id = self.vocab_size() as Symbol;
            let bytes = self.merged_bytes(pair);
            words.apply_merge(pair, id);
            tracing::trace!(left = pair.0, right = pair.1, id, count, "merge");
            self.merges.push(MergeRule {
                left: pair.0,
                right: pair.1,
                id,
                bytes,
                count,
            });
            self.index_rule(self.merges.len() - 1);
            new_merges += 1;
        }

        if self.kind == ModelKind::Unigram {
            self.log_probs = piece_log_probs(&words.symbol_counts(self.vocab_size()));
        }
        self.trained = true;

        tracing::info!(new_merges, vocab_size = self.vocab_size(), "training done");
        Ok(TrainReport {
            new_merges,
            vocab_size: self.vocab_size(),
            unique_sequences: words.num_words(),
        })
    }

    /// Compress a sequence of base-symbol ids.
    pub fn encode(&self, ids: &[Symbol]) -> Result<Vec<Symbol>, ModelError> {
        if !self.trained {
            return Err(ModelError::Untrained);
        }
        self.check_base_ids(ids)?;
        Ok(match self.kind {
            ModelKind::Bpe => encode_by_rank(ids, &self.ranks),
            ModelKind::Unigram => {
                encode_viterbi(ids, &self.pieces, self.max_piece_len, &self.log_probs)
            }
        })
    }

    /// Expand compressed ids back to base-symbol ids.
    pub fn decode(&self, ids: &[Symbol]) -> Result<Vec<Symbol>, ModelError> {
        if !self.trained {
            return Err(ModelError::Untrained);
        }
        let base = self.alphabet.len();
        let mut out = Vec::with_capacity(ids.len() * 2);
        for &id in ids {
            let idx = id as usize;
            if idx < base {
                out.push(id);
            } else if let Some(expansion) = self.expansions.get(idx - base) {
                out.extend_from_slice(expansion);
            } else {
                return Err(ModelError::UnknownSymbol {
                    id,
                    vocab_size: self.vocab_size(),
                });
            }
        }
        Ok(out)
    }

    /// Encode many sequences in parallel. Equivalent to calling `encode` on
    /// each one.
    pub fn encode_batch(&self, batch: &[Vec<Symbol>]) -> Result<Vec<Vec<Symbol>>, ModelError> {
        batch.par_iter().map(|ids| self.encode(ids)).collect()
    }

    /// Decode many sequences in parallel. Equivalent to calling `decode` on
    /// each one.
    pub fn decode_batch(&self, batch: &[Vec<Symbol>]) -> Result<Vec<Vec<Symbol>>, ModelError> {
        batch.par_iter().map(|ids| self.decode(ids)).collect()
    }

    fn check_base_ids(&self, ids: &[Symbol]) -> Result<(), ModelError> {
        match ids.iter().find(|&&id| id as usize >= self.alphabet.len()) {
            Some(&id) => Err(ModelError::UnknownSymbol {
                id,
                vocab_size: self.alphabet.len(),
            }),
            None => Ok(()),
        }
    }

    fn merged_bytes(&self, pair: SymbolPair) -> String {
        let mut bytes = self.symbol_bytes(pair.0).unwrap_or_default();
        bytes.push_str(&self.symbol_bytes(pair.1).unwrap_or_default());
        bytes
    }

    fn expansion_of(&self, id: Symbol) -> Vec<Symbol> {
        match self.expansion(id) {
            Some(exp) => exp.to_vec(),
            None => vec![id],
        }
    }

    /// Register rule `idx` in the lookup tables. Rules must be indexed in order.
    fn index_rule(&mut self, idx: usize) {
        let rule = &self.merges[idx];
        let pair = SymbolPair(rule.left, rule.right);
        let id = rule.id;
        let mut expansion = self.expansion_of(pair.0);
        expansion.extend(self.expansion_of(pair.1));
        self.max_piece_len = self.max_piece_len.max(expansion.len());
        self.ranks.insert(pair, (idx, id));
        self.pieces.insert(expansion.clone(), id);
        self.expansions.push(expansion);
    }

    fn rebuild_index(&mut self) -> Result<(), ModelError> {
        self.byte_index.clear();
        for (id, &c) in self.alphabet.iter().enumerate() {
            if self.byte_index.insert(c, id as Symbol).is_some() {
                return Err(ModelError::DuplicateByte(c));
            }
        }
        self.ranks.clear();
        self.pieces.clear();
        self.expansions.clear();
        self.max_piece_len = 1;
        for idx in 0..self.merges.len() {
            let rule = &self.merges[idx];
            let expected = (self.alphabet.len() + idx) as Symbol;
            if rule.id != expected || rule.left >= expected || rule.right >= expected {
                return Err(ModelError::UnknownSymbol {
                    id: rule.id,
                    vocab_size: expected as usize,
                });
            }
            self.index_rule(idx);
        }
        Ok(())
    }
}

/// Smoothed log-probability of each symbol from its corpus count.
fn piece_log_probs(counts: &[SymbolFreq]) -> Vec<f64> {
    let total: SymbolFreq = counts.iter().sum();
    let denom = (total + counts.len() as SymbolFreq) as f64;
    counts
        .iter()
        .map(|&c| ((c + 1) as f64 / denom).ln())
        .collect()
}

impl TryFrom<ModelData> for CompressionModel {
    type Error = ModelError;

    fn try_from(data: ModelData) -> Result<Self, Self::Error> {
        let mut model = CompressionModel::new(data.kind, data.alphabet.chars().collect())?;
        model.merges = data.merges;
        model.log_probs = data.log_probs;
        model.trained = data.trained;
        model.rebuild_index()?;
        Ok(model)
    }
}

impl From<CompressionModel> for ModelData {
    fn from(model: CompressionModel) -> Self {
        ModelData {
            kind: model.kind,
            alphabet: model.alphabet.into_iter().collect(),
            merges: model.merges,
            log_probs: model.log_probs,
            trained: model.trained,
        }
    }
}

impl PartialEq for CompressionModel {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.alphabet == other.alphabet
            && self.merges == other.merges
            && self.trained == other.trained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alphabet(n: usize) -> Vec<char> {
        (0..n).map(|i| char::from(b'A' + i as u8)).collect()
    }

    fn corpus() -> Vec<Vec<Symbol>> {
        vec![
            vec![0, 1, 2, 0, 1, 2, 3],
            vec![0, 1, 2, 3, 3, 0, 1],
            vec![2, 3, 0, 1, 2],
            vec![4, 4, 4, 4, 0, 1],
        ]
    }

    #[test]
    fn test_untrained_model_refuses_to_encode() {
        let model = CompressionModel::new(ModelKind::Bpe, alphabet(5)).unwrap();
        assert_eq!(model.encode(&[0, 1]), Err(ModelError::Untrained));
        assert_eq!(model.decode(&[0, 1]), Err(ModelError::Untrained));
    }

    #[test]
    fn test_duplicate_alphabet_rejected() {
        let err = CompressionModel::new(ModelKind::Bpe, vec!['a', 'b', 'a']).unwrap_err();
        assert_eq!(err, ModelError::DuplicateByte('a'));
    }

    #[test]
    fn test_bpe_training_reaches_target() {
        let mut model = CompressionModel::new(ModelKind::Bpe, alphabet(5)).unwrap();
        let report = model.train_ids(&corpus(), 8).unwrap();
        assert_eq!(report.new_merges, 3);
        assert_eq!(model.vocab_size(), 8);
        // (0, 1) is the most frequent pair.
        assert_eq!((model.merges()[0].left, model.merges()[0].right), (0, 1));
        assert_eq!(model.merges()[0].bytes, "AB");
    }

    #[test]
    fn test_training_stops_when_no_pairs_left() {
        let mut model = CompressionModel::new(ModelKind::Bpe, alphabet(3)).unwrap();
        let report = model.train_ids(&[vec![0, 1, 2]], 100).unwrap();
        assert_eq!(report.new_merges, 2);
        assert_eq!(model.encode(&[0, 1, 2]).unwrap().len(), 1);
    }

    #[test]
    fn test_round_trip_both_kinds() {
        for kind in [ModelKind::Bpe, ModelKind::Unigram] {
            let mut model = CompressionModel::new(kind, alphabet(5)).unwrap();
            model.train_ids(&corpus(), 12).unwrap();
            for seq in corpus().iter().chain([vec![4, 3, 2, 1, 0], vec![], vec![2]].iter()) {
                let encoded = model.encode(seq).unwrap();
                assert!(encoded.len() <= seq.len());
                assert_eq!(&model.decode(&encoded).unwrap(), seq, "{kind} round trip");
            }
        }
    }

    #[test]
    fn test_resumed_training_matches_one_shot() {
        for kind in [ModelKind::Bpe, ModelKind::Unigram] {
            let mut one_shot = CompressionModel::new(kind, alphabet(5)).unwrap();
            one_shot.train_ids(&corpus(), 11).unwrap();

            let mut two_shots = CompressionModel::new(kind, alphabet(5)).unwrap();
            two_shots.train_ids(&corpus(), 8).unwrap();
            two_shots.train_ids(&corpus(), 11).unwrap();

            assert_eq!(one_shot.merges(), two_shots.merges(), "{kind} resumed training");
        }
    }

    #[test]
    fn test_unknown_ids_rejected() {
        let mut model = CompressionModel::new(ModelKind::Bpe, alphabet(5)).unwrap();
        model.train_ids(&corpus(), 7).unwrap();
        assert!(matches!(
            model.encode(&[0, 5]),
            Err(ModelError::UnknownSymbol { id: 5, .. })
        ));
        assert!(matches!(
            model.decode(&[99]),
            Err(ModelError::UnknownSymbol { id: 99, .. })
        ));
    }

    #[test]
    fn test_batch_matches_single() {
        let mut model = CompressionModel::new(ModelKind::Bpe, alphabet(5)).unwrap();
        model.train_ids(&corpus(), 10).unwrap();
        let batch = model.encode_batch(&corpus()).unwrap();
        for (seq, encoded) in corpus().iter().zip(&batch) {
            assert_eq!(&model.encode(seq).unwrap(), encoded);
        }
        assert_eq!(model.decode_batch(&batch).unwrap(), corpus());
    }

    #[test]
    fn test_bytes_training_matches_ids_training() {
        let letters = alphabet(5);
        let as_bytes: Vec<String> = corpus()
            .iter()
            .map(|seq| seq.iter().map(|&s| letters[s as usize]).collect())
            .collect();
        let mut from_bytes = CompressionModel::new(ModelKind::Bpe, letters.clone()).unwrap();
        from_bytes.train_bytes(&as_bytes, 9).unwrap();
        let mut from_ids = CompressionModel::new(ModelKind::Bpe, letters).unwrap();
        from_ids.train_ids(&corpus(), 9).unwrap();
        assert_eq!(from_bytes, from_ids);
        assert_eq!(from_bytes.bytes_to_ids("AB").unwrap(), vec![0, 1]);
        assert_eq!(from_bytes.bytes_to_ids("Z"), Err(ModelError::UnknownByte('Z')));
    }

    #[test]
    fn test_serde_round_trip_rebuilds_lookup() {
        let mut model = CompressionModel::new(ModelKind::Unigram, alphabet(5)).unwrap();
        model.train_ids(&corpus(), 10).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let loaded: CompressionModel = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, model);
        for seq in corpus() {
            assert_eq!(loaded.encode(&seq).unwrap(), model.encode(&seq).unwrap());
        }
    }

    #[test]
    fn test_corrupt_merge_table_rejected() {
        let json = r#"{"kind":"Bpe","alphabet":"AB","merges":[{"left":0,"right":7,"id":2,"bytes":"A?","count":1}],"trained":true}"#;
        assert!(serde_json::from_str::<CompressionModel>(json).is_err());
    }

    #[test]
    fn test_check_alphabet() {
        let model = CompressionModel::new(ModelKind::Bpe, alphabet(3)).unwrap();
        assert!(model.check_alphabet(&['A', 'B', 'C']).is_ok());
        assert_eq!(
            model.check_alphabet(&['A', 'B']),
            Err(ModelError::AlphabetMismatch { expected: 3, found: 2 })
        );
        assert_eq!(model.check_alphabet(&['A', 'X', 'C']), Err(ModelError::UnknownByte('X')));
    }
}
