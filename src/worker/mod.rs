//! Proof-of-work search
//!
//! A [`MiningWorker`] searches for a sealing of a template block that meets a
//! minimum difficulty. A [`MiningSession`] runs one worker on behalf of the
//! node coordinator and reports the result tagged with the session id, so a
//! report from a torn-down session can always be told apart.

use crate::block::Block;
use crate::types::Difficulty;
use crate::utils::format_hash_rate;
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};
use uuid::Uuid;

pub mod cpu;

pub use cpu::CpuWorker;

/// Mining statistics for a worker
#[derive(Debug, Clone, Default)]
pub struct MiningStats {
    /// Total sealing attempts
    pub total_hashes: u64,
    /// Number of solutions found
    pub solutions_found: u64,
    /// Time spent mining (seconds)
    pub mining_time_secs: u64,
    /// Average hash rate (hashes per second)
    pub average_hash_rate: f64,
}

/// Mining worker trait
#[async_trait]
pub trait MiningWorker: Send {
    /// Get the worker type name for logging
    fn worker_type(&self) -> &'static str;

    /// Search for a sealing of `template` with difficulty of at least
    /// `min_difficulty`.
    ///
    /// Returns `Error::Cancelled` once `cancellation` fires.
    async fn mine(
        &mut self,
        template: Block,
        min_difficulty: Difficulty,
        cancellation: CancellationToken,
        stats_tx: Option<mpsc::UnboundedSender<MiningStats>>,
    ) -> Result<Block>;

    /// Get current mining statistics
    fn stats(&self) -> MiningStats {
        MiningStats::default()
    }
}

/// Number of parallel search workers: all CPUs, capped by `max_workers`
/// unless it is 0.
pub fn worker_count(max_workers: usize) -> usize {
    let cpus = num_cpus::get().max(1);
    if max_workers == 0 {
        cpus
    } else {
        cpus.min(max_workers)
    }
}

/// Utility function to compute hash rate over a time period
pub fn compute_hash_rate(hashes: u64, elapsed: Duration) -> f64 {
    if elapsed.as_secs_f64() > 0.0 {
        hashes as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    }
}

/// Create a tracing span for mining operations
pub fn mining_span(worker_type: &str, session: Uuid, height: u64) -> Span {
    tracing::info_span!(
        "mining",
        worker_type = worker_type,
        session = %session,
        height = height,
    )
}

/// A block found by the session identified by `session`
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub session: Uuid,
    pub block: Block,
}

/// One running search on top of a fixed parent block.
///
/// Dropping the session cancels its workers.
pub struct MiningSession {
    id: Uuid,
    template: Block,
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

impl MiningSession {
    /// Start searching for a child of `parent`.
    ///
    /// A solution is sent on `reports` at most once. Fails without spawning
    /// anything if `parent` cannot have a child.
    pub fn start(
        mut worker: Box<dyn MiningWorker>,
        parent: &Block,
        min_difficulty: Difficulty,
        reports: mpsc::UnboundedSender<MinedBlock>,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let template = Block::extend(parent)?;
        let cancellation = CancellationToken::new();
        let span = mining_span(worker.worker_type(), id, template.height);

        let task = {
            let template = template.clone();
            let cancellation = cancellation.clone();
            async move {
                let (stats_tx, mut stats_rx) = mpsc::unbounded_channel::<MiningStats>();
                let stats_logger = tokio::spawn(
                    async move {
                        while let Some(stats) = stats_rx.recv().await {
                            debug!(
                                "{} attempts in {}s, {}",
                                stats.total_hashes,
                                stats.mining_time_secs,
                                format_hash_rate(stats.average_hash_rate)
                            );
                        }
                    }
                    .in_current_span(),
                );

                match worker
                    .mine(template, min_difficulty, cancellation, Some(stats_tx))
                    .await
                {
                    Ok(block) => {
                        info!("Found block {} (difficulty {})", block, block.difficulty());
                        if reports.send(MinedBlock { session: id, block }).is_err() {
                            debug!("Coordinator stopped before the block could be reported");
                        }
                    }
                    Err(Error::Cancelled { .. }) => debug!("Mining session cancelled"),
                    Err(e) => warn!(category = e.category(), "Mining session stalled: {}", e),
                }

                let _ = stats_logger.await;
            }
            .instrument(span)
        };

        Ok(Self {
            id,
            template,
            cancellation,
            handle: tokio::spawn(task),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The unsealed block the workers are sealing
    pub fn template(&self) -> &Block {
        &self.template
    }

    /// Whether the session task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the workers
    pub fn stop(self) {
        debug!("Stopping mining session {}", self.id);
        // Drop cancels
    }
}

impl Drop for MiningSession {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count() {
        let cpus = num_cpus::get();
        assert_eq!(worker_count(0), cpus);
        assert_eq!(worker_count(1), 1);
        assert_eq!(worker_count(usize::MAX), cpus);
    }

    #[test]
    fn test_compute_hash_rate() {
        let rate = compute_hash_rate(1000, Duration::from_secs(10));
        assert_eq!(rate, 100.0);

        let rate = compute_hash_rate(0, Duration::from_secs(10));
        assert_eq!(rate, 0.0);

        let rate = compute_hash_rate(1000, Duration::from_secs(0));
        assert_eq!(rate, 0.0);
    }

    #[tokio::test]
    async fn test_session_reports_with_its_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let parent = Block::genesis();
        let session = MiningSession::start(Box::new(CpuWorker::new(2)), &parent, 4, tx).unwrap();
        assert_eq!(session.template().height, 1);

        let mined = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("mining timeout")
            .expect("session dropped without report");

        assert_eq!(mined.session, session.id());
        assert!(mined.block.difficulty() >= 4);
        assert!(mined.block.is_child_of(&parent));
    }

    #[tokio::test]
    async fn test_dropping_session_stops_workers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Practically unreachable difficulty
        let session = MiningSession::start(Box::new(CpuWorker::new(1)), &Block::genesis(), 200, tx).unwrap();
        let id = session.id();
        session.stop();

        // The session task exits and drops its sender without reporting
        let report = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("session did not shut down");
        assert!(report.is_none(), "unexpected report from session {}", id);
    }

    #[tokio::test]
    async fn test_sessions_on_same_parent_share_previous_hash() {
        let parent = Block::genesis();
        let mut blocks = Vec::new();
        for _ in 0..2 {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let _session = MiningSession::start(Box::new(CpuWorker::new(1)), &parent, 3, tx).unwrap();
            let mined = tokio::time::timeout(Duration::from_secs(30), rx.recv())
                .await
                .unwrap()
                .unwrap();
            blocks.push(mined.block);
        }

        assert_eq!(blocks[0].previous_hash, Some(parent.hash()));
        assert_eq!(blocks[0].previous_hash, blocks[1].previous_hash);
        assert_ne!(blocks[0].hash(), blocks[1].hash());
    }

    #[tokio::test]
    async fn test_session_refuses_parent_at_max_height() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut parent = Block::genesis();
        parent.height = u64::MAX;

        let result = MiningSession::start(Box::new(CpuWorker::new(1)), &parent, 4, tx);
        assert!(matches!(result, Err(Error::Block { .. })));
    }
}
