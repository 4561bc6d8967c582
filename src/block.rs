//! Block model
//!
//! A block is a height, a link to its parent and the nonce/timestamp pair
//! chosen by the miner. Its hash and difficulty are always recomputed from
//! the current field values.

use crate::crypto;
use crate::types::{Difficulty, Digest, Nonce};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Position in the chain, genesis is 0
    pub height: u64,
    /// Digest of the parent block, absent for genesis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<Digest>,
    /// Proof-of-work nonce, absent until sealed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Nonce>,
    /// Milliseconds since the Unix epoch at sealing time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl Block {
    /// The genesis block: height 0 and nothing else
    pub fn genesis() -> Self {
        Self {
            height: 0,
            previous_hash: None,
            nonce: None,
            created_at: None,
        }
    }

    /// Build an unsealed child of `parent`.
    ///
    /// Fails if `parent` already sits at the maximum height.
    pub fn extend(parent: &Block) -> Result<Self> {
        let height = parent
            .height
            .checked_add(1)
            .ok_or_else(|| Error::block(parent.height, "no height left for a child block"))?;
        Ok(Self {
            height,
            previous_hash: Some(parent.hash()),
            nonce: None,
            created_at: None,
        })
    }

    /// Assign a candidate nonce and timestamp
    pub fn seal(&mut self, nonce: Nonce, created_at: i64) {
        self.nonce = Some(nonce);
        self.created_at = Some(created_at);
    }

    /// Deterministic byte encoding of every field.
    ///
    /// Layout: height (u64 BE), then for each optional field a presence byte
    /// followed by the value (digest bytes, nonce u64 BE, timestamp i64 BE).
    pub fn preimage(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + 33 + 9 + 9);
        bytes.extend_from_slice(&self.height.to_be_bytes());
        match &self.previous_hash {
            Some(digest) => {
                bytes.push(1);
                bytes.extend_from_slice(digest.as_bytes());
            }
            None => bytes.push(0),
        }
        match self.nonce {
            Some(nonce) => {
                bytes.push(1);
                bytes.extend_from_slice(&nonce.to_bytes());
            }
            None => bytes.push(0),
        }
        match self.created_at {
            Some(created_at) => {
                bytes.push(1);
                bytes.extend_from_slice(&created_at.to_be_bytes());
            }
            None => bytes.push(0),
        }
        bytes
    }

    /// Digest of the block's full field set
    pub fn hash(&self) -> Digest {
        crypto::hash(&self.preimage())
    }

    /// Leading zero bits of the block's digest
    pub fn difficulty(&self) -> Difficulty {
        self.hash().leading_zero_bits()
    }

    /// Whether this block links to `parent` by hash and height
    pub fn is_child_of(&self, parent: &Block) -> bool {
        parent.height.checked_add(1) == Some(self.height)
            && self.previous_hash == Some(parent.hash())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.height, self.hash())
    }
}
