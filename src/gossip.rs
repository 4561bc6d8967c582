//! Chain exchange with the static peer list
//!
//! Push: every change of the current block is offered to every peer, one
//! fire-and-forget task per peer. Pull: at startup every peer's chain is
//! fetched and run through the fork-choice rule.

use crate::chain::Chain;
use crate::client::PeerClient;
use crate::node::NodeHandle;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Peer list plus the client used to reach it
#[derive(Debug, Clone)]
pub struct Gossip {
    peers: Arc<[String]>,
    client: PeerClient,
    advertising: bool,
}

impl Gossip {
    pub fn new(peers: Vec<String>, client: PeerClient, advertising: bool) -> Self {
        Self {
            peers: peers.into(),
            client,
            advertising,
        }
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    /// Offer `chain` to every peer without waiting for the outcome
    pub fn advertise(&self, chain: Arc<Chain>) {
        if !self.advertising {
            return;
        }

        for peer in self.peers.iter() {
            let peer = peer.clone();
            let client = self.client.clone();
            let chain = Arc::clone(&chain);
            tokio::spawn(async move {
                match client.push(&peer, &chain).await {
                    Ok(true) => debug!("Peer {} adopted our chain", peer),
                    Ok(false) => debug!("Peer {} kept its own chain", peer),
                    Err(e) => warn!(category = e.category(), "Failed to advertise to {}: {}", peer, e),
                }
            });
        }
    }

    /// Pull every peer's chain and offer it to `node`.
    ///
    /// Chains are offered in the order the pulls complete, so a slow peer
    /// does not hold back the others. Returns how many chains were adopted.
    pub async fn connect(&self, node: &NodeHandle) -> usize {
        info!("Connecting to {} peers", self.peers.len());

        let mut pulls: FuturesUnordered<_> = self
            .peers
            .iter()
            .map(|peer| async move { (peer, self.client.pull(peer).await) })
            .collect();

        let mut adopted = 0;
        while let Some((peer, result)) = pulls.next().await {
            let chain = match result {
                Ok(chain) => chain,
                Err(e) => {
                    warn!(category = e.category(), "Failed to pull chain from {}: {}", peer, e);
                    continue;
                }
            };

            match node.adopt(chain).await {
                Ok(true) => {
                    info!("Adopted chain from {}", peer);
                    adopted += 1;
                }
                Ok(false) => debug!("Chain from {} is not stronger than ours", peer),
                Err(e) => {
                    warn!(category = e.category(), "Could not offer chain from {}: {}", peer, e);
                    break;
                }
            }
        }

        adopted
    }
}
