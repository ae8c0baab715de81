// Token-type transition graph.
//
// Maps each token type to the types allowed to follow it. Schemes build it
// as a pure function of their configuration flags; the tokenizer adds the
// special tokens and caches the result. Used to score how well-formed a
// sequence is.
//
// Ordered collections keep the graph (and its serialized form) identical
// across builds from the same flags.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::event::TokenType;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeGraph {
    edges: BTreeMap<TokenType, BTreeSet<TokenType>>,
}

impl TypeGraph {
    pub fn new() -> Self {
        TypeGraph::default()
    }

    /// Register `from` with no successors, if absent.
    pub fn node(&mut self, from: TokenType) -> &mut Self {
        self.edges.entry(from).or_default();
        self
    }

    pub fn add(&mut self, from: TokenType, to: TokenType) -> &mut Self {
        self.edges.entry(from).or_default().insert(to);
        self
    }

    pub fn add_all(&mut self, from: TokenType, to: &[TokenType]) -> &mut Self {
        self.edges.entry(from).or_default().extend(to.iter().copied());
        self
    }

    pub fn contains(&self, kind: TokenType) -> bool {
        self.edges.contains_key(&kind)
    }

    pub fn allows(&self, from: TokenType, to: TokenType) -> bool {
        self.edges.get(&from).is_some_and(|next| next.contains(&to))
    }

    pub fn successors(&self, from: TokenType) -> impl Iterator<Item = TokenType> + '_ {
        self.edges.get(&from).into_iter().flatten().copied()
    }

    pub fn types(&self) -> impl Iterator<Item = TokenType> + '_ {
        self.edges.keys().copied()
    }

    /// Add special token types: `EOS` ends anything and leads nowhere, `PAD`
    /// follows anything and only repeats, the others (`BOS`, `MASK`, track
    /// delimiters) may precede and follow every type.
    pub fn with_specials(mut self, specials: &[TokenType]) -> Self {
        let musical: Vec<TokenType> = self.types().collect();
        for &special in specials {
            match special {
                TokenType::Eos => {
                    self.node(TokenType::Eos);
                    for &kind in &musical {
                        self.add(kind, TokenType::Eos);
                    }
                }
                TokenType::Pad => {
                    self.add(TokenType::Pad, TokenType::Pad);
                    for &kind in &musical {
                        self.add(kind, TokenType::Pad);
                    }
                    if specials.contains(&TokenType::Eos) {
                        self.add(TokenType::Eos, TokenType::Pad);
                    }
                }
                other => {
                    self.add_all(other, &musical);
                    for &kind in &musical {
                        self.add(kind, other);
                    }
                    self.add(other, other);
                    if specials.contains(&TokenType::Eos) {
                        self.add(other, TokenType::Eos);
                    }
                }
            }
        }
        self
    }
}
