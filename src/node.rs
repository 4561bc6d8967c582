//! Node coordinator
//!
//! One task owns the [`Ledger`], the active mining session and the block
//! subscribers. Everything else holds a [`NodeHandle`] and talks to it over
//! an unbounded command channel. Readers get the latest chain from a `watch`
//! channel without going through the coordinator.

use crate::block::Block;
use crate::chain::Chain;
use crate::gossip::Gossip;
use crate::ledger::Ledger;
use crate::storage::{persist_snapshots, ChainStore};
use crate::types::Difficulty;
use crate::worker::{CpuWorker, MinedBlock, MiningSession};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Callback run on every change of the current block.
///
/// Handlers run on the coordinator task, in registration order, and must
/// not block.
pub type BlockHandler = Box<dyn Fn(&Block) + Send + Sync>;

/// Identifies a registered [`BlockHandler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Static mining parameters
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub min_block_difficulty: Difficulty,
    /// Parallel search tasks per mining session
    pub worker_count: usize,
}

enum Command {
    Adopt {
        chain: Chain,
        reply: oneshot::Sender<bool>,
    },
    StartMining {
        reply: oneshot::Sender<()>,
    },
    StopMining {
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        handler: BlockHandler,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Cloneable handle to a running node
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Arc<Chain>>,
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

impl NodeHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| Error::node_stopped())?;
        response.await.map_err(|_| Error::node_stopped())
    }

    /// Run `chain` through the fork-choice rule. Returns whether it was
    /// adopted.
    pub async fn adopt(&self, chain: Chain) -> Result<bool> {
        self.request(|reply| Command::Adopt { chain, reply }).await
    }

    /// Latest published chain snapshot
    pub fn chain(&self) -> Arc<Chain> {
        self.snapshots.borrow().clone()
    }

    /// Last block of the latest snapshot
    pub fn current_block(&self) -> Block {
        self.chain().tip().cloned().unwrap_or_else(Block::genesis)
    }

    /// Receiver that is notified on every snapshot change
    pub fn watch(&self) -> watch::Receiver<Arc<Chain>> {
        self.snapshots.clone()
    }

    /// Mine on the current block, and on every new one until stopped
    pub async fn start_mining(&self) -> Result<()> {
        self.request(|reply| Command::StartMining { reply }).await
    }

    /// Tear down the active session and stop restarting it
    pub async fn stop_mining(&self) -> Result<()> {
        self.request(|reply| Command::StopMining { reply }).await
    }

    /// Register a block-updated handler
    pub async fn subscribe<F>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&Block) + Send + Sync + 'static,
    {
        let handler: BlockHandler = Box::new(handler);
        self.request(|reply| Command::Subscribe { handler, reply })
            .await
    }

    /// Remove a handler. Returns false if it was not registered.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        self.request(|reply| Command::Unsubscribe { id, reply }).await
    }

    /// Ask the coordinator to stop. Pending commands sent before this one
    /// are still processed.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Owner of all mutable node state
pub struct NodeCoordinator {
    ledger: Ledger,
    settings: NodeSettings,
    gossip: Gossip,
    snapshots: watch::Sender<Arc<Chain>>,
    commands: mpsc::UnboundedReceiver<Command>,
    reports_tx: mpsc::UnboundedSender<MinedBlock>,
    reports: mpsc::UnboundedReceiver<MinedBlock>,
    mining_enabled: bool,
    session: Option<MiningSession>,
    subscribers: Vec<(SubscriptionId, BlockHandler)>,
    next_subscription: u64,
}

impl NodeCoordinator {
    /// Start the coordinator and its persister.
    ///
    /// The returned task finishes after shutdown once the last snapshot has
    /// been handed to `store`.
    pub fn spawn(
        ledger: Ledger,
        settings: NodeSettings,
        gossip: Gossip,
        store: Arc<dyn ChainStore>,
    ) -> (NodeHandle, JoinHandle<()>) {
        let (snapshots, snapshot_rx) = watch::channel(Arc::clone(ledger.chain()));
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (reports_tx, reports) = mpsc::unbounded_channel();

        let persister = tokio::spawn(persist_snapshots(store, snapshots.subscribe()));

        let coordinator = Self {
            ledger,
            settings,
            gossip,
            snapshots,
            commands,
            reports_tx,
            reports,
            mining_enabled: false,
            session: None,
            subscribers: Vec::new(),
            next_subscription: 0,
        };

        let task = tokio::spawn(async move {
            coordinator.run().await;
            if let Err(e) = persister.await {
                warn!("Chain persister failed: {}", e);
            }
        });

        let handle = NodeHandle {
            commands: commands_tx,
            snapshots: snapshot_rx,
        };

        (handle, task)
    }

    async fn run(mut self) {
        info!(
            "Node coordinator started at {} (strength {})",
            self.ledger.current_block(),
            self.ledger.strength()
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(mined) = self.reports.recv() => self.handle_mined(mined),
            }
        }

        self.stop_session();
        info!(
            "Node coordinator stopped at {} (strength {})",
            self.ledger.current_block(),
            self.ledger.strength()
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Adopt { chain, reply } => {
                let adopted = self.ledger.compare_and_adopt(chain);
                if adopted {
                    self.block_updated();
                }
                let _ = reply.send(adopted);
            }
            Command::StartMining { reply } => {
                self.mining_enabled = true;
                if self.session.as_ref().map_or(true, MiningSession::is_finished) {
                    self.start_session();
                }
                let _ = reply.send(());
            }
            Command::StopMining { reply } => {
                self.mining_enabled = false;
                self.stop_session();
                let _ = reply.send(());
            }
            Command::Subscribe { handler, reply } => {
                let id = SubscriptionId(self.next_subscription);
                self.next_subscription += 1;
                self.subscribers.push((id, handler));
                let _ = reply.send(id);
            }
            Command::Unsubscribe { id, reply } => {
                let before = self.subscribers.len();
                self.subscribers.retain(|(existing, _)| *existing != id);
                let _ = reply.send(self.subscribers.len() < before);
            }
            Command::Shutdown => {}
        }
    }

    fn handle_mined(&mut self, mined: MinedBlock) {
        if self.session.as_ref().map(MiningSession::id) != Some(mined.session) {
            debug!("Discarding block from stale session {}", mined.session);
            return;
        }

        match self
            .ledger
            .append_mined(mined.block, self.settings.min_block_difficulty)
        {
            Ok(()) => {
                info!(
                    "Appended mined block {} (strength {})",
                    self.ledger.current_block(),
                    self.ledger.strength()
                );
                self.block_updated();
            }
            Err(e) => {
                warn!(category = e.category(), "Rejected mined block: {}", e);
                if self.mining_enabled {
                    self.start_session();
                }
            }
        }
    }

    /// Publish the new current block and react to it
    fn block_updated(&mut self) {
        let chain = Arc::clone(self.ledger.chain());
        self.snapshots.send_replace(Arc::clone(&chain));

        if self.mining_enabled {
            self.start_session();
        }

        self.gossip.advertise(chain);

        let block = self.ledger.current_block();
        for (_, handler) in &self.subscribers {
            handler(block);
        }
    }

    fn start_session(&mut self) {
        self.stop_session();
        let worker = Box::new(CpuWorker::new(self.settings.worker_count));
        match MiningSession::start(
            worker,
            self.ledger.current_block(),
            self.settings.min_block_difficulty,
            self.reports_tx.clone(),
        ) {
            Ok(session) => {
                debug!(
                    "Started mining session {} on {}",
                    session.id(),
                    self.ledger.current_block()
                );
                self.session = Some(session);
            }
            Err(e) => warn!(
                category = e.category(),
                "Cannot mine on {}: {}",
                self.ledger.current_block(),
                e
            ),
        }
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }
}
