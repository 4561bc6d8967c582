//! powchain node - Main Application

use powchain::{
    client::PeerClient,
    gossip::Gossip,
    logging::init_logging,
    server::serve,
    storage::{ChainStore, FileStore, MemoryStore},
    Block, Config, Ledger, NodeCoordinator, Result, APP_DESCRIPTION, APP_NAME, APP_VERSION,
};

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().await?;

    if config.info {
        print_info();
        return Ok(());
    }

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let _log_guard = init_logging(config.log_level, config.log_format, config.log_file.as_deref())?;

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: peers={:?}, min_block_difficulty={}, listen={}:{}, mining={}",
        config.peers,
        config.min_block_difficulty,
        config.interface,
        config.port,
        !config.no_mine
    );

    run(config).await
}

/// Load, serve, connect, mine, then wait for Ctrl-C
async fn run(config: Config) -> Result<()> {
    let store: Arc<dyn ChainStore> = if config.ephemeral {
        info!("Ephemeral node, the chain will not be persisted");
        Arc::new(MemoryStore::default())
    } else {
        Arc::new(FileStore::new(&config.chain_file))
    };

    let ledger = Ledger::open(store.as_ref(), config.min_chain_strength).await;

    let client = PeerClient::new(config.http_timeout_duration()?)?;
    let gossip = Gossip::new(config.peers.clone(), client, config.advertising());
    let (node, coordinator) =
        NodeCoordinator::spawn(ledger, config.node_settings(), gossip.clone(), store);

    let listener = TcpListener::bind(config.socket_addr()?).await?;
    let shutdown = CancellationToken::new();
    let mut server = tokio::spawn(serve(listener, node.clone(), shutdown.clone()));

    node.subscribe(|block: &Block| {
        info!("Block updated: {} (difficulty {})", block, block.difficulty());
    })
    .await?;

    let adopted = gossip.connect(&node).await;
    info!(
        "Connected to peers, adopted {} chains, now at height {}",
        adopted,
        node.current_block().height
    );

    if config.no_mine {
        info!("Mining disabled");
    } else {
        node.start_mining().await?;
    }

    let server_finished = tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
            false
        }
        result = &mut server => {
            match result {
                Ok(Ok(())) => warn!("HTTP server exited, shutting down"),
                Ok(Err(e)) => error!(category = e.category(), "HTTP server failed: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
            true
        }
    };

    if let Err(e) = node.stop_mining().await {
        warn!("Failed to stop mining: {}", e);
    }

    shutdown.cancel();
    if !server_finished {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(category = e.category(), "HTTP server failed: {}", e),
            Err(e) => error!("HTTP server task failed: {}", e),
        }
    }

    node.shutdown();
    if let Err(e) = coordinator.await {
        error!("Node coordinator failed: {}", e);
    }

    let chain = node.chain();
    info!(
        "Stopped with {} blocks (strength {})",
        chain.len(),
        chain.strength()
    );
    Ok(())
}

/// Print basic program information
fn print_info() {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!("{}", APP_DESCRIPTION);
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}
