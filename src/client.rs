//! HTTP client for talking to peer nodes
//!
//! Peers expose the same two endpoints this node serves: `GET /` returns the
//! peer's chain, `POST /` offers it ours. Calls are single-shot; a failed
//! call is reported to the caller and never retried.

use crate::chain::Chain;
use crate::{Error, Result};
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Client for peer chain exchange
#[derive(Debug, Clone)]
pub struct PeerClient {
    client: Client,
}

impl PeerClient {
    /// Create a new peer client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(Error::from)?;

        Ok(Self { client })
    }

    /// Endpoint URL for a `host:port` peer address
    pub fn peer_url(peer: &str) -> Result<Url> {
        Url::parse(&format!("http://{}/", peer))
            .map_err(|e| Error::peer(peer, format!("invalid address: {}", e)))
    }

    /// Offer `chain` to `peer`. Returns whether the peer adopted it.
    #[instrument(skip(self, chain), fields(blocks = chain.len()))]
    pub async fn push(&self, peer: &str, chain: &Chain) -> Result<bool> {
        let url = Self::peer_url(peer)?;
        debug!("Pushing chain to {}", url);

        let response = self.client.post(url).json(chain).send().await?;

        match response.status() {
            StatusCode::CREATED => Ok(true),
            status if status.is_client_error() => Ok(false),
            status => Err(Error::peer(peer, format!("push failed: HTTP {}", status))),
        }
    }

    /// Fetch `peer`'s current chain
    #[instrument(skip(self))]
    pub async fn pull(&self, peer: &str) -> Result<Chain> {
        let url = Self::peer_url(peer)?;
        debug!("Pulling chain from {}", url);

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(Error::peer(
                peer,
                format!("pull failed: HTTP {}", response.status()),
            ));
        }

        let chain: Chain = response
            .json()
            .await
            .map_err(|e| Error::peer(peer, format!("unreadable chain: {}", e)))?;

        debug!("Received {} blocks from {}", chain.len(), peer);
        Ok(chain)
    }
}
