// Segmentation of base-symbol sequences with a learned merge table.
//
// Two strategies:
// - `encode_by_rank`: BPE. Applies merges in the order they were learned,
//   using a priority queue of (rank, position) candidates over an index-linked
//   list. Stale candidates are detected on pop and skipped. The result is
//   identical to replaying every merge sequentially over the sequence.
// - `encode_viterbi`: unigram-style. Finds the segmentation into known pieces
//   with the highest summed log-probability.
//
// Both only ever combine symbols that were adjacent in the input, so the
// output always expands back to the exact input.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use crate::types::{Symbol, SymbolPair};

/// Position of a symbol in the sequence being encoded.
type SeqIdx = usize;

#[derive(Debug, PartialEq, Eq)]
struct MergeCandidate {
    /// Merge order from training. Lower values are applied first.
    rank: usize,
    pair: SymbolPair,
    /// Index of the left symbol of the pair.
    position: SeqIdx,
}

impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the lowest rank, then the leftmost
        // position.
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.position.cmp(&self.position))
    }
}

/// Node of the index-linked list. `None` slots have been consumed by a merge.
#[derive(Debug, Clone, Copy)]
struct Node {
    symbol: Symbol,
    prev: Option<SeqIdx>,
    next: Option<SeqIdx>,
}

/// Apply ranked merges to `symbols`.
///
/// `ranks` maps a pair to `(rank, merged symbol)`.
pub(crate) fn encode_by_rank(
    symbols: &[Symbol],
    ranks: &FxHashMap<SymbolPair, (usize, Symbol)>,
) -> Vec<Symbol> {
    if symbols.len() < 2 || ranks.is_empty() {
        return symbols.to_vec();
    }

    let n = symbols.len();
    let mut nodes: Vec<Option<Node>> = symbols
        .iter()
        .enumerate()
        .map(|(i, &symbol)| {
            Some(Node {
                symbol,
                prev: i.checked_sub(1),
                next: if i + 1 < n { Some(i + 1) } else { None },
            })
        })
        .collect();

    let mut heap = BinaryHeap::new();
    for i in 0..n - 1 {
        push_candidate(&mut heap, ranks, symbols[i], symbols[i + 1], i);
    }

    while let Some(candidate) = heap.pop() {
        let pos = candidate.position;
        let Some(left) = nodes[pos] else {
            continue;
        };
        let Some(right_idx) = left.next else {
            continue;
        };
        let Some(right) = nodes[right_idx] else {
            continue;
        };
        if SymbolPair(left.symbol, right.symbol) != candidate.pair {
            continue;
        }
        let Some(&(_, merged)) = ranks.get(&candidate.pair) else {
            continue;
        };

        // The merged symbol lives at the left slot; the right slot is consumed.
        nodes[pos] = Some(Node {
            symbol: merged,
            prev: left.prev,
            next: right.next,
        });
        nodes[right_idx] = None;
        if let Some(next_idx) = right.next {
            if let Some(next) = nodes[next_idx].as_mut() {
                next.prev = Some(pos);
            }
        }

        if let Some(prev_idx) = left.prev {
            if let Some(prev) = nodes[prev_idx] {
                push_candidate(&mut heap, ranks, prev.symbol, merged, prev_idx);
            }
        }
        if let Some(next_idx) = right.next {
            if let Some(next) = nodes[next_idx] {
                push_candidate(&mut heap, ranks, merged, next.symbol, pos);
            }
        }
    }

    let mut out = Vec::with_capacity(n);
    let mut cursor = Some(0);
    while let Some(idx) = cursor {
        match nodes[idx] {
            Some(node) => {
                out.push(node.symbol);
                cursor = node.next;
            }
            None => break,
        }
    }
    out
}

fn push_candidate(
    heap: &mut BinaryHeap<MergeCandidate>,
    ranks: &FxHashMap<SymbolPair, (usize, Symbol)>,
    left: Symbol,
    right: Symbol,
    position: SeqIdx,
) {
    let pair = SymbolPair(left, right);
    if let Some(&(rank, _)) = ranks.get(&pair) {
        heap.push(MergeCandidate {
            rank,
            pair,
            position,
        });
    }
}

/// Segment `symbols` into the pieces with the best total log-probability.
///
/// `pieces` maps the base-symbol expansion of each learned merge to its id;
/// single base symbols are always valid pieces. `log_probs` is indexed by
/// symbol id.
pub(crate) fn encode_viterbi(
    symbols: &[Symbol],
    pieces: &FxHashMap<Vec<Symbol>, Symbol>,
    max_piece_len: usize,
    log_probs: &[f64],
) -> Vec<Symbol> {
    let n = symbols.len();
    if n == 0 {
        return Vec::new();
    }
    let score_of = |sym: Symbol| log_probs.get(sym as usize).copied().unwrap_or(f64::MIN);

    // best[i]: best score of a segmentation of symbols[..i].
    let mut best = vec![f64::NEG_INFINITY; n + 1];
    // back[i]: (start, piece) of the last piece of that segmentation.
    let mut back: Vec<(SeqIdx, Symbol)> = vec![(0, 0); n + 1];
    best[0] = 0.0;

    for end in 1..=n {
        // Longer pieces first so ties prefer fewer, larger pieces.
        for len in (1..=max_piece_len.max(1).min(end)).rev() {
            let start = end - len;
            if !best[start].is_finite() {
                continue;
            }
            let piece = if len == 1 {
                Some(symbols[start])
            } else {
                pieces.get(&symbols[start..end]).copied()
            };
            let Some(piece) = piece else {
                continue;
            };
            let score = best[start] + score_of(piece);
            if score > best[end] {
                best[end] = score;
                back[end] = (start, piece);
            }
        }
    }

    let mut out = Vec::new();
    let mut end = n;
    while end > 0 {
        let (start, piece) = back[end];
        out.push(piece);
        end = start;
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranks(rules: &[(Symbol, Symbol, Symbol)]) -> FxHashMap<SymbolPair, (usize, Symbol)> {
        rules
            .iter()
            .enumerate()
            .map(|(rank, &(a, b, m))| (SymbolPair(a, b), (rank, m)))
            .collect()
    }

    #[test]
    fn test_rank_encoding_applies_earliest_merge_first() {
        // Merges: (1,2)->10, (2,3)->11. "1 2 3" must become "10 3".
        let r = ranks(&[(1, 2, 10), (2, 3, 11)]);
        assert_eq!(encode_by_rank(&[1, 2, 3], &r), vec![10, 3]);
    }

    #[test]
    fn test_rank_encoding_chains_merges() {
        let r = ranks(&[(1, 2, 10), (10, 3, 11), (11, 11, 12)]);
        assert_eq!(encode_by_rank(&[1, 2, 3, 1, 2, 3, 4], &r), vec![12, 4]);
    }

    #[test]
    fn test_rank_encoding_overlapping_runs() {
        let r = ranks(&[(5, 5, 9)]);
        assert_eq!(encode_by_rank(&[5, 5, 5], &r), vec![9, 5]);
        assert_eq!(encode_by_rank(&[5, 5, 5, 5], &r), vec![9, 9]);
    }

    #[test]
    fn test_viterbi_prefers_probable_pieces() {
        let mut pieces = FxHashMap::default();
        pieces.insert(vec![1, 2], 10);
        pieces.insert(vec![2, 3], 11);
        // 10 is likely, 11 is not.
        let log_probs = vec![-5.0, -5.0, -5.0, -5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -1.0, -20.0];
        assert_eq!(encode_viterbi(&[1, 2, 3], &pieces, 2, &log_probs), vec![10, 3]);
    }

    #[test]
    fn test_viterbi_falls_back_to_base_symbols() {
        let pieces = FxHashMap::default();
        let log_probs = vec![-1.0; 4];
        assert_eq!(encode_viterbi(&[3, 0, 2], &pieces, 1, &log_probs), vec![3, 0, 2]);
    }
}
