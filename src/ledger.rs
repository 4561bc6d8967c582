//! Local chain state and the fork-choice rule
//!
//! [`Ledger`] is a plain state object; it is owned by the node coordinator
//! task and never shared. The only ways to change it are adopting a strictly
//! stronger chain or appending a locally mined block onto the current tip.

use crate::block::Block;
use crate::chain::Chain;
use crate::storage::ChainStore;
use crate::types::{Difficulty, Strength};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Chain owned by a single node
#[derive(Debug, Clone)]
pub struct Ledger {
    chain: Arc<Chain>,
    current: Block,
    strength: Strength,
    min_chain_strength: Strength,
    cold_start: bool,
}

impl Ledger {
    /// Start from `[genesis]` with nothing adopted yet
    pub fn cold(min_chain_strength: Option<Strength>) -> Self {
        Self {
            chain: Arc::new(Chain::genesis()),
            current: Block::genesis(),
            strength: 0,
            min_chain_strength: min_chain_strength.unwrap_or(0),
            cold_start: true,
        }
    }

    /// Resume from a previously stored chain.
    ///
    /// An empty chain, or one that fails structural validation, falls back to
    /// a cold start.
    pub fn from_stored(chain: Chain, min_chain_strength: Option<Strength>) -> Self {
        let strength = chain.strength();
        let current = match chain.tip() {
            Some(tip) if chain.is_contiguous() => tip.clone(),
            _ => return Self::cold(min_chain_strength),
        };
        Self {
            chain: Arc::new(chain),
            current,
            strength,
            min_chain_strength: min_chain_strength.unwrap_or(0),
            cold_start: false,
        }
    }

    /// Load the ledger from storage, reporting cold starts
    pub async fn open(store: &dyn ChainStore, min_chain_strength: Option<Strength>) -> Self {
        let ledger = match store.load().await {
            Ok(Some(chain)) => {
                let blocks = chain.len();
                let ledger = Self::from_stored(chain, min_chain_strength);
                if ledger.is_cold_start() {
                    warn!("Stored chain of {} blocks failed validation, starting from genesis", blocks);
                } else {
                    info!(
                        "Loaded local chain: {} blocks, strength {}",
                        ledger.chain.len(),
                        ledger.strength
                    );
                }
                ledger
            }
            Ok(None) => {
                info!("No local chain found, starting from genesis");
                Self::cold(min_chain_strength)
            }
            Err(e) => {
                warn!(category = e.category(), "Failed to load local chain: {}", e);
                Self::cold(min_chain_strength)
            }
        };

        if ledger.needs_trust_warning(min_chain_strength) {
            warn!(
                "No local chain and no minimum chain strength configured. This is normal for a \
                 new node, but any peer can hand us an arbitrary chain; make sure the configured \
                 peers are honest or set --min-chain-strength"
            );
        }

        ledger
    }

    /// Whether a cold-started node would accept any peer chain at all
    fn needs_trust_warning(&self, min_chain_strength: Option<Strength>) -> bool {
        self.cold_start && min_chain_strength.is_none()
    }

    /// Current chain snapshot
    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    /// The chain's last block
    pub fn current_block(&self) -> &Block {
        &self.current
    }

    /// Strength of the local chain
    pub fn strength(&self) -> Strength {
        self.strength
    }

    /// True until the first chain is adopted or mined onto
    pub fn is_cold_start(&self) -> bool {
        self.cold_start
    }

    /// Replace the local chain if `candidate` is strictly stronger.
    ///
    /// While on a cold start the candidate must also reach the configured
    /// minimum chain strength. Returns whether the candidate was adopted.
    pub fn compare_and_adopt(&mut self, candidate: Chain) -> bool {
        let candidate_strength = candidate.strength();
        if candidate_strength <= self.strength {
            return false;
        }
        if self.cold_start && candidate_strength < self.min_chain_strength {
            warn!(
                "Rejecting chain of strength {} below the minimum of {} on cold start",
                candidate_strength, self.min_chain_strength
            );
            return false;
        }
        let Some(tip) = candidate.tip().cloned() else {
            return false;
        };

        info!(
            "Adopting chain: {} blocks, strength {} (was {} blocks, strength {})",
            candidate.len(),
            candidate_strength,
            self.chain.len(),
            self.strength
        );

        self.chain = Arc::new(candidate);
        self.current = tip;
        self.strength = candidate_strength;
        self.cold_start = false;
        true
    }

    /// Append a locally mined block on top of the current tip
    pub fn append_mined(&mut self, block: Block, min_difficulty: Difficulty) -> Result<()> {
        let difficulty = block.difficulty();
        if difficulty < min_difficulty {
            return Err(Error::block(
                block.height,
                format!("difficulty {} below minimum {}", difficulty, min_difficulty),
            ));
        }
        if !block.is_child_of(&self.current) {
            return Err(Error::block(
                block.height,
                format!("does not extend current tip {}", self.current),
            ));
        }

        Arc::make_mut(&mut self.chain).push(block.clone());
        self.current = block;
        self.strength += Strength::from(difficulty);
        self.cold_start = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::Nonce;
    use assert_matches::assert_matches;

    /// Brute-force a child of `parent` whose difficulty is exactly `difficulty`
    fn child_with_difficulty(parent: &Block, difficulty: Difficulty) -> Block {
        let mut block = Block::extend(parent).unwrap();
        for nonce in 0.. {
            block.seal(Nonce::new(nonce), 1_700_000_000_000);
            if block.difficulty() == difficulty {
                return block;
            }
        }
        unreachable!()
    }

    fn chain_of(difficulties: &[Difficulty]) -> Chain {
        let mut blocks = vec![Block::genesis()];
        for &difficulty in difficulties {
            let child = child_with_difficulty(blocks.last().unwrap(), difficulty);
            blocks.push(child);
        }
        Chain::new(blocks)
    }

    #[test]
    fn test_adopts_stronger_chain() {
        let mut ledger = Ledger::cold(None);
        let candidate = chain_of(&[10]);
        assert_eq!(candidate.strength(), 10);

        assert!(ledger.compare_and_adopt(candidate.clone()));
        assert_eq!(ledger.strength(), 10);
        assert_eq!(ledger.chain().as_ref(), &candidate);
        assert_eq!(ledger.current_block(), candidate.tip().unwrap());
        assert_eq!(ledger.current_block().hash(), candidate.tip().unwrap().hash());
        assert!(!ledger.is_cold_start());
    }

    #[test]
    fn test_equal_strength_keeps_incumbent() {
        let incumbent = chain_of(&[3, 3]);
        let mut ledger = Ledger::from_stored(incumbent.clone(), None);
        let rival = chain_of(&[6]);
        assert_eq!(rival.strength(), incumbent.strength());

        assert!(!ledger.compare_and_adopt(rival));
        assert_eq!(ledger.chain().as_ref(), &incumbent);
    }

    #[test]
    fn test_weaker_chain_is_rejected() {
        let mut ledger = Ledger::from_stored(chain_of(&[5, 5]), None);
        assert!(!ledger.compare_and_adopt(chain_of(&[4, 4])));
        assert_eq!(ledger.strength(), 10);
    }

    #[test]
    fn test_height_gap_is_never_adopted() {
        let mut ledger = Ledger::cold(None);
        let genesis = Block::genesis();
        let mut skipped = child_with_difficulty(&genesis, 12);
        skipped.height = 2;
        let candidate = Chain::new(vec![genesis, skipped]);
        assert_eq!(candidate.strength(), 0);
        assert!(!ledger.compare_and_adopt(candidate));
        assert!(ledger.is_cold_start());
    }

    #[test]
    fn test_empty_candidate_is_rejected() {
        let mut ledger = Ledger::cold(None);
        assert!(!ledger.compare_and_adopt(Chain::default()));
        assert_eq!(ledger.chain().len(), 1);
    }

    #[test]
    fn test_minimum_strength_applies_on_cold_start() {
        let mut ledger = Ledger::cold(Some(8));
        assert!(!ledger.compare_and_adopt(chain_of(&[5])));
        assert!(ledger.is_cold_start());
        assert!(ledger.compare_and_adopt(chain_of(&[4, 4])));
        assert!(!ledger.is_cold_start());
        // Once warm, only the strict-inequality rule applies
        assert!(ledger.compare_and_adopt(chain_of(&[9])));
    }

    #[test]
    fn test_append_mined() {
        let mut ledger = Ledger::cold(None);
        let block = child_with_difficulty(ledger.current_block(), 3);
        ledger.append_mined(block.clone(), 3).unwrap();
        assert_eq!(ledger.chain().len(), 2);
        assert_eq!(ledger.current_block(), &block);
        assert_eq!(ledger.strength(), 3);
        assert_eq!(ledger.strength(), ledger.chain().strength());
    }

    #[test]
    fn test_append_rejects_low_difficulty() {
        let mut ledger = Ledger::cold(None);
        let block = child_with_difficulty(ledger.current_block(), 2);
        assert_matches!(ledger.append_mined(block, 3), Err(Error::Block { height: 1, .. }));
        assert_eq!(ledger.chain().len(), 1);
    }

    #[test]
    fn test_append_rejects_stale_parent() {
        let mut ledger = Ledger::cold(None);
        let first = child_with_difficulty(ledger.current_block(), 1);
        let rival = child_with_difficulty(&Block::genesis(), 2);
        ledger.append_mined(first, 1).unwrap();
        assert_matches!(ledger.append_mined(rival, 1), Err(Error::Block { .. }));
        assert_eq!(ledger.chain().len(), 2);
    }

    #[test]
    fn test_append_does_not_disturb_published_snapshot() {
        let mut ledger = Ledger::cold(None);
        let snapshot = Arc::clone(ledger.chain());
        let block = child_with_difficulty(ledger.current_block(), 1);
        ledger.append_mined(block, 1).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(ledger.chain().len(), 2);
    }

    #[test]
    fn test_from_stored_falls_back_on_invalid_chain() {
        let mut blocks = chain_of(&[2, 2]).into_blocks();
        blocks[2].height = 7;
        let ledger = Ledger::from_stored(Chain::new(blocks), None);
        assert!(ledger.is_cold_start());
        assert_eq!(ledger.chain().len(), 1);

        let ledger = Ledger::from_stored(Chain::default(), None);
        assert!(ledger.is_cold_start());

        let ledger = Ledger::from_stored(chain_of(&[2]), None);
        assert!(!ledger.is_cold_start());
        assert_eq!(ledger.current_block().height, 1);
    }

    #[test]
    fn test_trust_warning_only_for_unguarded_cold_start() {
        assert!(Ledger::cold(None).needs_trust_warning(None));
        assert!(!Ledger::cold(Some(10)).needs_trust_warning(Some(10)));
        // A configured floor of zero still counts as a deliberate choice
        assert!(!Ledger::cold(Some(0)).needs_trust_warning(Some(0)));

        let warm = Ledger::from_stored(chain_of(&[2]), None);
        assert!(!warm.needs_trust_warning(None));
    }

    #[tokio::test]
    async fn test_open_from_store() {
        let store = MemoryStore::default();
        let ledger = Ledger::open(&store, None).await;
        assert!(ledger.is_cold_start());

        let chain = chain_of(&[1, 2]);
        store.save(&chain).await.unwrap();
        let ledger = Ledger::open(&store, Some(100)).await;
        assert!(!ledger.is_cold_start());
        assert_eq!(ledger.strength(), 3);
        assert_eq!(ledger.current_block().height, 2);
    }
}
