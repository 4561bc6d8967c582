//! Chain snapshots and the chain-strength rule

use crate::block::Block;
use crate::types::Strength;
use serde::{Deserialize, Serialize};

/// Ordered block sequence, index 0 is genesis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain(Vec<Block>);

impl Chain {
    /// Wrap an ordered block sequence
    pub fn new(blocks: Vec<Block>) -> Self {
        Self(blocks)
    }

    /// A chain holding only the genesis block
    pub fn genesis() -> Self {
        Self(vec![Block::genesis()])
    }

    pub fn blocks(&self) -> &[Block] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The last block, if any
    pub fn tip(&self) -> Option<&Block> {
        self.0.last()
    }

    /// Cumulative difficulty, or 0 if the chain is not contiguous
    pub fn strength(&self) -> Strength {
        chain_strength(&self.0)
    }

    /// Whether every block links to its predecessor
    pub fn is_contiguous(&self) -> bool {
        self.0.windows(2).all(|pair| pair[1].is_child_of(&pair[0]))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.0.iter()
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.0
    }

    pub(crate) fn push(&mut self, block: Block) {
        self.0.push(block);
    }
}

impl From<Vec<Block>> for Chain {
    fn from(blocks: Vec<Block>) -> Self {
        Self(blocks)
    }
}

impl<'a> IntoIterator for &'a Chain {
    type Item = &'a Block;
    type IntoIter = std::slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Sum of the difficulties of every non-genesis block.
///
/// Returns 0 as soon as one block fails to link to its predecessor by
/// `previous_hash` or does not sit exactly one height above it.
pub fn chain_strength(blocks: &[Block]) -> Strength {
    let mut strength: Strength = 0;
    for pair in blocks.windows(2) {
        let (parent, block) = (&pair[0], &pair[1]);
        if !block.is_child_of(parent) {
            return 0;
        }
        strength += Strength::from(block.difficulty());
    }
    strength
}
