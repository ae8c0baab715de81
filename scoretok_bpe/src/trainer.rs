// Merge training over a corpus of symbol sequences.
//
// The corpus is deduplicated into unique "words" (whole sequences, or whole
// per-track slices) with occurrence counts, so a merge only ever happens
// inside one word and never across the boundary between two of them.
//
// Each training step recounts adjacent pairs across the corpus in parallel
// (rayon fold/reduce), picks the best pair on a single thread, then rewrites
// every word in parallel. Both selection criteria (frequency for BPE,
// likelihood ratio for unigram) share this loop.
//
// Selection is fully deterministic: ties are broken by the pair value, so
// training twice on the same corpus, or training in two resumed steps,
// produces identical merge tables.

use std::cmp::Ordering;

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::types::{ModelKind, Symbol, SymbolFreq, SymbolPair};

/// Deduplicated training corpus.
#[derive(Debug, Default)]
pub(crate) struct Corpus {
    words: Vec<Vec<Symbol>>,
    freqs: Vec<SymbolFreq>,
}

impl Corpus {
    /// Build a corpus from sequences, merging identical sequences into one
    /// word with a summed count. Words are sorted so iteration order does not
    /// depend on hashing.
    pub(crate) fn from_sequences<I>(sequences: I) -> Self
    where
        I: IntoIterator<Item = Vec<Symbol>>,
    {
        let mut counts: FxHashMap<Vec<Symbol>, SymbolFreq> = FxHashMap::default();
        for seq in sequences {
            if seq.is_empty() {
                continue;
            }
            *counts.entry(seq).or_insert(0) += 1;
        }
        let mut entries: Vec<(Vec<Symbol>, SymbolFreq)> = counts.into_iter().collect();
        entries.sort_unstable();
        let (words, freqs) = entries.into_iter().unzip();
        Corpus { words, freqs }
    }

    pub(crate) fn num_words(&self) -> usize {
        self.words.len()
    }

    /// Count every adjacent pair, weighted by word frequency.
    pub(crate) fn pair_counts(&self) -> FxHashMap<SymbolPair, SymbolFreq> {
        self.words
            .par_iter()
            .zip(self.freqs.par_iter())
            .fold(FxHashMap::default, |mut acc, (word, &freq)| {
                for window in word.windows(2) {
                    *acc.entry(SymbolPair(window[0], window[1])).or_insert(0) += freq;
                }
                acc
            })
            .reduce(FxHashMap::default, |mut a, b| {
                if a.len() < b.len() {
                    return merge_counts(b, a);
                }
                for (pair, count) in b {
                    *a.entry(pair).or_insert(0) += count;
                }
                a
            })
    }

    /// Count occurrences of every symbol id below `vocab_size`.
    pub(crate) fn symbol_counts(&self, vocab_size: usize) -> Vec<SymbolFreq> {
        self.words
            .par_iter()
            .zip(self.freqs.par_iter())
            .fold(
                || vec![0; vocab_size],
                |mut acc, (word, &freq)| {
                    for &sym in word {
                        if let Some(slot) = acc.get_mut(sym as usize) {
                            *slot += freq;
                        }
                    }
                    acc
                },
            )
            .reduce(
                || vec![0; vocab_size],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    a
                },
            )
    }

    /// Replace every occurrence of `pair` by `merged` in all words.
    /// Returns the weighted number of replacements.
    pub(crate) fn apply_merge(&mut self, pair: SymbolPair, merged: Symbol) -> SymbolFreq {
        self.words
            .par_iter_mut()
            .zip(self.freqs.par_iter())
            .map(|(word, &freq)| merge_in_place(word, pair, merged) as SymbolFreq * freq)
            .sum()
    }
}

fn merge_counts(
    mut into: FxHashMap<SymbolPair, SymbolFreq>,
    from: FxHashMap<SymbolPair, SymbolFreq>,
) -> FxHashMap<SymbolPair, SymbolFreq> {
    for (pair, count) in from {
        *into.entry(pair).or_insert(0) += count;
    }
    into
}

/// Merge non-overlapping occurrences of `pair` left to right.
/// Returns how many merges were made.
pub(crate) fn merge_in_place(word: &mut Vec<Symbol>, pair: SymbolPair, merged: Symbol) -> usize {
    if word.len() < 2 {
        return 0;
    }
    let mut merges = 0;
    let mut write = 0;
    let mut read = 0;
    while read < word.len() {
        if read + 1 < word.len() && word[read] == pair.0 && word[read + 1] == pair.1 {
            word[write] = merged;
            read += 2;
            merges += 1;
        } else {
            word[write] = word[read];
            read += 1;
        }
        write += 1;
    }
    word.truncate(write);
    merges
}

/// A pair competing to become the next merge. The greatest candidate wins.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f64,
    count: SymbolFreq,
    pair: SymbolPair,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher score, then higher count, then the smaller pair.
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.count.cmp(&other.count))
            .then_with(|| other.pair.cmp(&self.pair))
    }
}

/// Pick the next pair to merge, or `None` when the corpus has no pairs left.
pub(crate) fn select_pair(
    kind: ModelKind,
    pair_counts: &FxHashMap<SymbolPair, SymbolFreq>,
    symbol_counts: Option<&[SymbolFreq]>,
) -> Option<(SymbolPair, SymbolFreq)> {
    pair_counts
        .iter()
        .map(|(&pair, &count)| {
            let score = match (kind, symbol_counts) {
                (ModelKind::Unigram, Some(units)) => {
                    let a = units.get(pair.0 as usize).copied().unwrap_or(0).max(1);
                    let b = units.get(pair.1 as usize).copied().unwrap_or(0).max(1);
                    count as f64 / (a as f64 * b as f64)
                }
                _ => count as f64,
            };
            Candidate { score, count, pair }
        })
        .max()
        .map(|c| (c.pair, c.count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_in_place_non_overlapping() {
        let mut word = vec![1, 1, 1, 2];
        let n = merge_in_place(&mut word, SymbolPair(1, 1), 9);
        assert_eq!(n, 1);
        assert_eq!(word, vec![9, 1, 2]);
    }

    #[test]
    fn test_merge_in_place_short_word() {
        let mut word = vec![4];
        assert_eq!(merge_in_place(&mut word, SymbolPair(4, 4), 7), 0);
        assert_eq!(word, vec![4]);
    }

    #[test]
    fn test_corpus_deduplicates_words() {
        let corpus = Corpus::from_sequences(vec![vec![1, 2], vec![1, 2], vec![3], vec![]]);
        assert_eq!(corpus.num_words(), 2);
        let counts = corpus.pair_counts();
        assert_eq!(counts.get(&SymbolPair(1, 2)), Some(&2));
    }

    #[test]
    fn test_pairs_never_span_words() {
        let corpus = Corpus::from_sequences(vec![vec![1, 2], vec![3, 4]]);
        let counts = corpus.pair_counts();
        assert!(!counts.contains_key(&SymbolPair(2, 3)));
    }

    #[test]
    fn test_select_pair_frequency_tie_breaks_on_pair() {
        let mut counts = FxHashMap::default();
        counts.insert(SymbolPair(5, 6), 3);
        counts.insert(SymbolPair(1, 2), 3);
        counts.insert(SymbolPair(0, 9), 1);
        let (pair, count) = select_pair(ModelKind::Bpe, &counts, None).unwrap();
        assert_eq!(pair, SymbolPair(1, 2));
        assert_eq!(count, 3);
    }

    #[test]
    fn test_select_pair_likelihood_prefers_exclusive_pairs() {
        // (1, 2) always co-occur; (3, 4) is more frequent but 3 and 4 are
        // common on their own.
        let mut counts = FxHashMap::default();
        counts.insert(SymbolPair(1, 2), 4);
        counts.insert(SymbolPair(3, 4), 6);
        let units = vec![0, 4, 4, 30, 30];
        let (pair, _) = select_pair(ModelKind::Unigram, &counts, Some(&units)).unwrap();
        assert_eq!(pair, SymbolPair(1, 2));
    }

    #[test]
    fn test_apply_merge_counts_weighted() {
        let mut corpus = Corpus::from_sequences(vec![vec![1, 2, 1, 2], vec![1, 2, 1, 2], vec![2, 1]]);
        let merged = corpus.apply_merge(SymbolPair(1, 2), 10);
        assert_eq!(merged, 4);
        let counts = corpus.pair_counts();
        assert_eq!(counts.get(&SymbolPair(10, 10)), Some(&2));
    }
}
