// The tokenizer facade.
//
// A `Tokenizer` ties a scheme to its vocabulary, its type graph (with the
// special tokens added) and, once trained, a compression model. It converts
// scores to `TokSequence`s and back, fills in missing sequence views,
// scores validity, compresses ids, and saves/loads its parameters.
//
// Compressed ids never contain merged special tokens: a sequence is
// compressed run by run between special ids, so PAD/BOS/EOS/MASK and track
// delimiters stay single tokens and merges never cross a track boundary.
// Training splits its corpus the same way.

use std::ops::Range;
use std::path::Path;

use rayon::prelude::*;
use scoretok_bpe::{CompressionModel, ModelKind, TrainReport};
use serde::{Deserialize, Serialize};

use crate::config::{SchemeKind, TokenizerConfig};
use crate::error::{Result, TokenizerError};
use crate::event::Event;
use crate::graph::TypeGraph;
use crate::scheme::mmm::{TRACK_END, TRACK_START, track_ranges};
use crate::scheme::{self, ProgramHint, Scheme};
use crate::score::Score;
use crate::sequence::TokSequence;
use crate::vocab::{Vocabulary, id_to_symbol};

/// Everything needed to rebuild a tokenizer without retraining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerParams {
    pub config: TokenizerConfig,
    pub vocab: Vocabulary,
    pub model: Option<CompressionModel>,
}

/// Result of tokenizing a score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// All tracks in one sequence.
    Single(TokSequence),
    /// One sequence per track.
    PerTrack(Vec<TokSequence>),
}

impl Encoding {
    pub fn sequences(&self) -> &[TokSequence] {
        match self {
            Encoding::Single(seq) => std::slice::from_ref(seq),
            Encoding::PerTrack(seqs) => seqs,
        }
    }

    pub fn into_sequences(self) -> Vec<TokSequence> {
        match self {
            Encoding::Single(seq) => vec![seq],
            Encoding::PerTrack(seqs) => seqs,
        }
    }
}

#[derive(Debug)]
pub struct Tokenizer {
    scheme: Box<dyn Scheme>,
    vocab: Vocabulary,
    graph: TypeGraph,
    model: Option<CompressionModel>,
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig) -> Result<Self> {
        let scheme = scheme::build(config)?;
        let specials = scheme.config().special_token_strings()?;
        let vocab = Vocabulary::new(&specials, scheme.base_vocabulary());
        let graph = scheme
            .type_graph()
            .with_specials(&scheme.config().special_types()?);
        tracing::debug!(
            scheme = %scheme.kind(),
            vocab_size = vocab.len(),
            "tokenizer created"
        );
        Ok(Tokenizer {
            scheme,
            vocab,
            graph,
            model: None,
        })
    }

    /// Configuration in effect, after the scheme adjusted it.
    pub fn config(&self) -> &TokenizerConfig {
        self.scheme.config()
    }

    pub fn kind(&self) -> SchemeKind {
        self.scheme.kind()
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn graph(&self) -> &TypeGraph {
        &self.graph
    }

    pub fn model(&self) -> Option<&CompressionModel> {
        self.model.as_ref()
    }

    /// Size of the id space: the compression model's vocabulary once one
    /// exists, the token vocabulary otherwise.
    pub fn len(&self) -> usize {
        self.model
            .as_ref()
            .map_or(self.vocab.len(), CompressionModel::vocab_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn trained_model(&self) -> Result<&CompressionModel> {
        self.model
            .as_ref()
            .filter(|m| m.is_trained())
            .ok_or(TokenizerError::NoModel)
    }

    /// Tokenize a score. Every view of the returned sequences is filled in;
    /// ids are compressed when a trained model is present.
    pub fn encode(&self, score: &Score) -> Result<Encoding> {
        let mut seqs: Vec<TokSequence> = self
            .scheme
            .score_to_events(score)?
            .into_iter()
            .map(TokSequence::from_events)
            .collect();
        let compress = self.trained_model().is_ok();
        for seq in &mut seqs {
            self.complete_sequence(seq)?;
            if compress {
                self.encode_ids(seq)?;
            }
        }
        if self.scheme.one_token_stream() {
            Ok(Encoding::Single(seqs.into_iter().next().unwrap_or_default()))
        } else {
            Ok(Encoding::PerTrack(seqs))
        }
    }

    /// Tokenize many scores in parallel.
    pub fn encode_batch(&self, scores: &[Score]) -> Result<Vec<Encoding>> {
        scores.par_iter().map(|score| self.encode(score)).collect()
    }

    /// Rebuild a score. Sequences may carry any view, compressed or not.
    /// `programs` gives the program of each independent sequence.
    pub fn decode(&self, seqs: &[TokSequence], programs: Option<&[ProgramHint]>) -> Result<Score> {
        let events = seqs
            .iter()
            .map(|seq| self.base_events(seq))
            .collect::<Result<Vec<_>>>()?;
        self.scheme.events_to_score(&events, programs)
    }

    /// Fill in the missing views of a sequence from a present one. Compressed
    /// ids stay compressed; the other views are base-level.
    pub fn complete_sequence(&self, seq: &mut TokSequence) -> Result<()> {
        let base_ids = self.base_ids(seq)?;
        if seq.tokens.is_none() {
            let tokens = base_ids
                .iter()
                .map(|&id| self.vocab.token_of(id).map(str::to_string))
                .collect::<Result<Vec<_>>>()?;
            seq.tokens = Some(tokens);
        }
        if seq.events.is_none() {
            let events = seq
                .tokens()
                .iter()
                .map(|t| Event::from_token(t))
                .collect::<Result<Vec<_>>>()?;
            seq.events = Some(events);
        }
        if seq.bytes.is_none() {
            seq.bytes = Some(base_ids.iter().map(|&id| id_to_symbol(id)).collect());
        }
        if seq.ids.is_none() {
            seq.ids = Some(base_ids);
        }
        Ok(())
    }

    /// Base vocabulary ids of a sequence, from whichever view is present.
    fn base_ids(&self, seq: &TokSequence) -> Result<Vec<u32>> {
        if let Some(ids) = seq.ids.as_ref().filter(|_| !seq.are_ids_encoded) {
            if let Some(&id) = ids.iter().find(|&&id| id as usize >= self.vocab.len()) {
                return Err(TokenizerError::UnknownId(id));
            }
            return Ok(ids.clone());
        }
        if let Some(tokens) = &seq.tokens {
            return tokens.iter().map(|t| self.vocab.id_of(t)).collect();
        }
        if let Some(events) = &seq.events {
            return events.iter().map(|e| self.vocab.id_of(&e.token())).collect();
        }
        if let Some(bytes) = &seq.bytes {
            return bytes.chars().map(|c| self.vocab.id_of_symbol(c)).collect();
        }
        match &seq.ids {
            Some(ids) => Ok(self.trained_model()?.decode(ids)?),
            None => Ok(Vec::new()),
        }
    }

    fn base_events(&self, seq: &TokSequence) -> Result<Vec<Event>> {
        if let Some(events) = &seq.events {
            return Ok(events.clone());
        }
        let mut seq = seq.clone();
        self.complete_sequence(&mut seq)?;
        Ok(seq.events.unwrap_or_default())
    }

    /// Share of erroneous tokens in a sequence, in `[0, 1]`. Compressed
    /// sequences are measured on their decompressed tokens.
    pub fn tokens_errors(&self, seq: &TokSequence) -> Result<f64> {
        let events = self.base_events(seq)?;
        if events.is_empty() {
            return Ok(0.0);
        }
        let errors = self.scheme.count_errors(&events, &self.graph);
        Ok((errors as f64 / events.len() as f64).min(1.0))
    }

    /// Split a multi-track stream into its tracks at `Track_Start` ids,
    /// keeping or dropping the delimiters. Other schemes, and streams with no
    /// delimiter, come back whole.
    pub fn split_per_track(
        &self,
        seq: &TokSequence,
        keep_delimiters: bool,
    ) -> Result<Vec<TokSequence>> {
        let (Some(start), Some(end)) = (self.vocab.id(TRACK_START), self.vocab.id(TRACK_END))
        else {
            return Ok(vec![seq.clone()]);
        };
        if self.kind() != SchemeKind::Mmm {
            return Ok(vec![seq.clone()]);
        }
        let mut seq = seq.clone();
        if seq.ids.is_none() {
            self.complete_sequence(&mut seq)?;
        }
        let ranges: Vec<Range<usize>> =
            track_ranges(seq.ids(), |&id| id == start, |&id| id == end, keep_delimiters);
        Ok(ranges.into_iter().map(|range| seq.slice(range)).collect())
    }

    /// Compress the ids of a sequence in place.
    pub fn encode_ids(&self, seq: &mut TokSequence) -> Result<()> {
        if seq.are_ids_encoded {
            return Ok(());
        }
        let model = self.trained_model()?;
        self.complete_sequence(seq)?;
        let ids = seq.ids();
        let mut out = Vec::with_capacity(ids.len());
        let mut run_start = 0;
        for (i, &id) in ids.iter().enumerate() {
            if self.vocab.is_special(id) {
                if i > run_start {
                    out.extend(model.encode(&ids[run_start..i])?);
                }
                out.push(id);
                run_start = i + 1;
            }
        }
        if run_start < ids.len() {
            out.extend(model.encode(&ids[run_start..])?);
        }
        seq.ids = Some(out);
        seq.are_ids_encoded = true;
        Ok(())
    }

    /// Expand compressed ids back to base ids, filling the other views.
    pub fn decode_ids(&self, seq: &mut TokSequence) -> Result<()> {
        if !seq.are_ids_encoded {
            return Ok(());
        }
        let base = self.trained_model()?.decode(seq.ids())?;
        seq.ids = Some(base);
        seq.are_ids_encoded = false;
        self.complete_sequence(seq)
    }

    pub fn encode_ids_batch(&self, seqs: &mut [TokSequence]) -> Result<()> {
        seqs.par_iter_mut().try_for_each(|seq| self.encode_ids(seq))
    }

    pub fn decode_ids_batch(&self, seqs: &mut [TokSequence]) -> Result<()> {
        seqs.par_iter_mut().try_for_each(|seq| self.decode_ids(seq))
    }

    /// Train (or keep training) the compression model on a corpus of
    /// sequences until the id space reaches `vocab_size` or no pair is
    /// left. A model of a different kind cannot be resumed.
    pub fn train(
        &mut self,
        vocab_size: usize,
        kind: ModelKind,
        corpus: &[TokSequence],
    ) -> Result<TrainReport> {
        if let Some(model) = &self.model {
            if model.kind() != kind {
                return Err(TokenizerError::Config(format!(
                    "cannot continue training a {} model as {kind}",
                    model.kind()
                )));
            }
        }
        let per_sequence = corpus
            .par_iter()
            .map(|seq| -> Result<Vec<Vec<u32>>> {
                let ids = self.base_ids(seq)?;
                Ok(ids
                    .split(|&id| self.vocab.is_special(id))
                    .filter(|run| !run.is_empty())
                    .map(<[u32]>::to_vec)
                    .collect())
            })
            .collect::<Result<Vec<_>>>()?;
        let runs: Vec<Vec<u32>> = per_sequence.into_iter().flatten().collect();

        let mut model = match self.model.take() {
            Some(model) => model,
            None => CompressionModel::new(kind, self.vocab.symbols())?,
        };
        tracing::info!(
            scheme = %self.kind(),
            sequences = corpus.len(),
            runs = runs.len(),
            target = vocab_size,
            "training tokenizer"
        );
        let report = model.train_ids(&runs, vocab_size);
        self.model = Some(model);
        report.map_err(TokenizerError::from)
    }

    /// Append a token to the vocabulary. The vocabulary is frozen once a
    /// compression model exists, since the model's alphabet is the
    /// vocabulary.
    pub fn add_to_vocab(&mut self, token: &str) -> Result<u32> {
        if self.model.is_some() {
            return Err(TokenizerError::Config(format!(
                "cannot add {token:?}: the vocabulary is frozen by the compression model"
            )));
        }
        Event::from_token(token)?;
        Ok(self.vocab.push(token.to_string()))
    }

    pub fn params(&self) -> TokenizerParams {
        TokenizerParams {
            config: self.config().clone(),
            vocab: self.vocab.clone(),
            model: self.model.clone(),
        }
    }

    /// Rebuild a tokenizer. The stored vocabulary must start with the one
    /// the configuration produces; tokens added later are kept.
    pub fn from_params(params: TokenizerParams) -> Result<Self> {
        let mut tokenizer = Tokenizer::new(params.config)?;
        let expected = tokenizer.vocab.tokens();
        let stored = params.vocab.tokens();
        if params.vocab.num_special() != tokenizer.vocab.num_special()
            || stored.len() < expected.len()
            || stored[..expected.len()] != *expected
        {
            return Err(TokenizerError::IncompatibleVocabulary(format!(
                "stored vocabulary of {} tokens does not extend the {} tokens of the configuration",
                stored.len(),
                expected.len()
            )));
        }
        tokenizer.vocab = params.vocab;
        if let Some(model) = params.model {
            model.check_alphabet(&tokenizer.vocab.symbols())?;
            tokenizer.model = Some(model);
        }
        Ok(tokenizer)
    }

    pub fn save_params(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(&self.params())?)?;
        Ok(())
    }

    pub fn load_params(path: &Path) -> Result<Self> {
        let params: TokenizerParams = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Self::from_params(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{Note, Track};

    fn config() -> TokenizerConfig {
        TokenizerConfig {
            num_velocities: 127,
            ..TokenizerConfig::default()
        }
    }

    fn melody(offset: u8) -> Score {
        let mut score = Score::new(480);
        let mut track = Track::for_program(0);
        for i in 0..16u32 {
            let pitch = 60 + offset + (i % 4) as u8;
            track.notes.push(Note::new(i * 480, 480, pitch, 100));
        }
        score.tracks.push(track);
        score
    }

    fn single(encoding: Encoding) -> TokSequence {
        encoding.into_sequences().remove(0)
    }

    #[test]
    fn test_specials_first() {
        let tok = Tokenizer::new(config()).unwrap();
        assert_eq!(tok.vocab().token(0), Some("PAD_None"));
        assert_eq!(tok.vocab().token(3), Some("MASK_None"));
        assert_eq!(tok.vocab().num_special(), 4);
        assert_eq!(tok.len(), tok.vocab().len());
    }

    #[test]
    fn test_encode_fills_every_view() {
        let tok = Tokenizer::new(config()).unwrap();
        let mut score = Score::new(480);
        let mut track = Track::for_program(0);
        track.notes.push(Note::new(0, 480, 60, 100));
        score.tracks.push(track);
        let seq = single(tok.encode(&score).unwrap());
        assert_eq!(seq.tokens(), &["NoteOn_60", "Velocity_100", "TimeShift_1.0.8", "NoteOff_60"]);
        let ids: Vec<u32> = seq.tokens().iter().map(|t| tok.vocab().id(t).unwrap()).collect();
        assert_eq!(seq.ids(), ids.as_slice());
        assert_eq!(seq.bytes.as_ref().map(|b| b.chars().count()), Some(4));
        assert!(!seq.are_ids_encoded);

        let decoded = tok.decode(&[seq], None).unwrap();
        assert_eq!(decoded.tracks[0].notes, vec![Note::new(0, 480, 60, 100)]);
    }

    #[test]
    fn test_complete_from_any_view() {
        let tok = Tokenizer::new(config()).unwrap();
        let full = single(tok.encode(&melody(0)).unwrap());
        let from_ids = {
            let mut s = TokSequence::from_ids(full.ids().to_vec());
            tok.complete_sequence(&mut s).unwrap();
            s
        };
        let from_bytes = {
            let mut s = TokSequence::from_bytes(full.bytes.clone().unwrap());
            tok.complete_sequence(&mut s).unwrap();
            s
        };
        let from_tokens = {
            let mut s = TokSequence::from_tokens(full.tokens().to_vec());
            tok.complete_sequence(&mut s).unwrap();
            s
        };
        for s in [&from_ids, &from_bytes, &from_tokens] {
            assert_eq!(s.ids(), full.ids());
            assert_eq!(s.tokens(), full.tokens());
            assert_eq!(s.bytes, full.bytes);
        }
    }

    #[test]
    fn test_unknown_id_rejected() {
        let tok = Tokenizer::new(config()).unwrap();
        let mut s = TokSequence::from_ids(vec![10_000]);
        assert!(matches!(tok.complete_sequence(&mut s), Err(TokenizerError::UnknownId(10_000))));
    }

    #[test]
    fn test_validity_of_fresh_and_broken_sequences() {
        let tok = Tokenizer::new(config()).unwrap();
        let seq = single(tok.encode(&melody(0)).unwrap());
        assert_eq!(tok.tokens_errors(&seq).unwrap(), 0.0);
        assert_eq!(tok.tokens_errors(&TokSequence::default()).unwrap(), 0.0);

        let broken = TokSequence::from_tokens(vec!["NoteOff_60".into(), "NoteOff_61".into()]);
        assert_eq!(tok.tokens_errors(&broken).unwrap(), 1.0);
        let half = TokSequence::from_tokens(vec![
            "NoteOn_60".into(),
            "Velocity_100".into(),
            "TimeShift_1.0.8".into(),
            "NoteOff_62".into(),
        ]);
        assert_eq!(tok.tokens_errors(&half).unwrap(), 0.25);
    }

    #[test]
    fn test_compression_round_trip() {
        let mut tok = Tokenizer::new(config()).unwrap();
        let corpus: Vec<TokSequence> = (0..4).map(|o| single(tok.encode(&melody(o)).unwrap())).collect();
        let target = tok.vocab().len() + 20;
        let report = tok.train(target, ModelKind::Bpe, &corpus).unwrap();
        assert!(report.new_merges > 0);
        assert_eq!(tok.len(), report.vocab_size);

        let mut seq = single(tok.encode(&melody(1)).unwrap());
        assert!(seq.are_ids_encoded);
        assert!(seq.ids().len() < seq.tokens().len(), "training data should compress");
        let base_ids: Vec<u32> = seq.tokens().iter().map(|t| tok.vocab().id(t).unwrap()).collect();
        tok.decode_ids(&mut seq).unwrap();
        assert!(!seq.are_ids_encoded);
        assert_eq!(seq.ids(), base_ids.as_slice());

        let decoded = tok.decode(&[single(tok.encode(&melody(1)).unwrap())], None).unwrap();
        assert_eq!(decoded.tracks[0].notes, melody(1).tracks[0].notes);
    }

    #[test]
    fn test_specials_never_merged() {
        let mut tok = Tokenizer::new(config()).unwrap();
        let body = single(tok.encode(&melody(0)).unwrap());
        let bos = tok.vocab().id("BOS_None").unwrap();
        let eos = tok.vocab().id("EOS_None").unwrap();
        let mut ids = vec![bos];
        ids.extend_from_slice(body.ids());
        ids.push(eos);
        let corpus = vec![TokSequence::from_ids(ids.clone()); 3];
        tok.train(tok.vocab().len() + 30, ModelKind::Bpe, &corpus).unwrap();
        for rule in tok.model().unwrap().merges() {
            assert!(rule.left != bos && rule.right != bos && rule.left != eos && rule.right != eos);
        }
        let mut seq = TokSequence::from_ids(ids.clone());
        tok.encode_ids(&mut seq).unwrap();
        assert_eq!(seq.ids().first(), Some(&bos));
        assert_eq!(seq.ids().last(), Some(&eos));
        tok.decode_ids(&mut seq).unwrap();
        assert_eq!(seq.ids(), ids.as_slice());
    }

    #[test]
    fn test_batch_matches_single() {
        let mut tok = Tokenizer::new(config()).unwrap();
        let corpus: Vec<TokSequence> = (0..3).map(|o| single(tok.encode(&melody(o)).unwrap())).collect();
        tok.train(tok.vocab().len() + 10, ModelKind::Unigram, &corpus).unwrap();
        let mut batch: Vec<TokSequence> =
            corpus.iter().map(|s| TokSequence::from_ids(s.ids().to_vec())).collect();
        tok.encode_ids_batch(&mut batch).unwrap();
        for (batched, original) in batch.iter().zip(&corpus) {
            let mut one = TokSequence::from_ids(original.ids().to_vec());
            tok.encode_ids(&mut one).unwrap();
            assert_eq!(batched.ids(), one.ids());
        }
        tok.decode_ids_batch(&mut batch).unwrap();
        for (decoded, original) in batch.iter().zip(&corpus) {
            assert_eq!(decoded.ids(), original.ids());
        }
    }

    #[test]
    fn test_encode_ids_without_model() {
        let tok = Tokenizer::new(config()).unwrap();
        let mut seq = single(tok.encode(&melody(0)).unwrap());
        assert!(matches!(tok.encode_ids(&mut seq), Err(TokenizerError::NoModel)));
    }

    #[test]
    fn test_train_kind_mismatch() {
        let mut tok = Tokenizer::new(config()).unwrap();
        let corpus = vec![single(tok.encode(&melody(0)).unwrap())];
        tok.train(tok.vocab().len() + 2, ModelKind::Bpe, &corpus).unwrap();
        let result = tok.train(tok.vocab().len() + 4, ModelKind::Unigram, &corpus);
        assert!(matches!(result, Err(TokenizerError::Config(_))));
        assert!(tok.model().is_some(), "failed training keeps the model");
    }

    #[test]
    fn test_add_to_vocab() {
        let mut tok = Tokenizer::new(config()).unwrap();
        let before = tok.vocab().len();
        let id = tok.add_to_vocab("Program_200").unwrap();
        assert_eq!(id as usize, before);
        assert!(matches!(tok.add_to_vocab("garbage"), Err(TokenizerError::MalformedToken(_))));

        let corpus = vec![single(tok.encode(&melody(0)).unwrap())];
        tok.train(tok.vocab().len() + 2, ModelKind::Bpe, &corpus).unwrap();
        assert!(matches!(tok.add_to_vocab("Program_201"), Err(TokenizerError::Config(_))));
    }

    #[test]
    fn test_params_round_trip() {
        let mut tok = Tokenizer::new(config()).unwrap();
        tok.add_to_vocab("Program_200").unwrap();
        let corpus = vec![single(tok.encode(&melody(0)).unwrap())];
        tok.train(tok.vocab().len() + 5, ModelKind::Bpe, &corpus).unwrap();

        let json = serde_json::to_string(&tok.params()).unwrap();
        let loaded = Tokenizer::from_params(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(loaded.vocab(), tok.vocab());
        assert_eq!(loaded.model(), tok.model());
        assert_eq!(loaded.len(), tok.len());
        assert_eq!(loaded.encode(&melody(2)).unwrap(), tok.encode(&melody(2)).unwrap());
    }

    #[test]
    fn test_params_incompatible_vocab() {
        let tok = Tokenizer::new(config()).unwrap();
        let mut params = tok.params();
        params.config.pitch_range = (30, 100);
        assert!(matches!(
            Tokenizer::from_params(params),
            Err(TokenizerError::IncompatibleVocabulary(_))
        ));
    }

    #[test]
    fn test_split_per_track() {
        let tok = Tokenizer::new(TokenizerConfig {
            num_velocities: 127,
            ..TokenizerConfig::mmm(SchemeKind::MidiLike)
        })
        .unwrap();
        let mut score = melody(0);
        let mut bass = Track::for_program(33);
        bass.notes.push(Note::new(0, 960, 40, 90));
        score.tracks.push(bass);
        let seq = single(tok.encode(&score).unwrap());

        let kept = tok.split_per_track(&seq, true).unwrap();
        assert_eq!(kept.len(), 2);
        let mut joined = kept[0].clone();
        joined.concat(&kept[1]);
        assert_eq!(joined, seq);

        let stripped = tok.split_per_track(&seq, false).unwrap();
        assert_eq!(stripped[1].tokens().first().map(String::as_str), Some("Program_33"));
        assert_eq!(stripped[1].tokens().last().map(String::as_str), Some("NoteOff_40"));

        let plain = Tokenizer::new(config()).unwrap();
        assert_eq!(plain.split_per_track(&seq, false).unwrap(), vec![seq.clone()]);
    }
}
