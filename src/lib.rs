//! powchain
//!
//! A minimal proof-of-work ledger node:
//! - Parallel CPU mining of blocks on a single chain
//! - Strongest-chain fork choice by cumulative difficulty
//! - Push/pull gossip of full chains to a static peer list over HTTP
//! - "Block updated" notifications for local observers

pub mod block;
pub mod chain;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gossip;
pub mod ledger;
pub mod logging;
pub mod node;
pub mod server;
pub mod storage;
pub mod types;
pub mod utils;
pub mod worker;

pub use block::Block;
pub use chain::{chain_strength, Chain};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use node::{NodeCoordinator, NodeHandle, NodeSettings, SubscriptionId};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "powchain";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
