//! CPU mining worker implementation
//!
//! Parallel search tasks each draw random nonces, stamp the current time and
//! hash the candidate until one meets the minimum difficulty.

use super::{compute_hash_rate, MiningStats, MiningWorker};
use crate::block::Block;
use crate::crypto::meets_difficulty;
use crate::types::{Difficulty, Nonce};
use crate::utils::{current_timestamp_millis, format_hash_rate};
use crate::{Error, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attempts between cancellation checks and scheduler yields
pub const BATCH_SIZE: u64 = 10_000;

/// CPU mining worker running parallel search tasks
pub struct CpuWorker {
    thread_count: usize,
    stats: Arc<CpuMiningStats>,
}

/// Thread-safe mining statistics for CPU worker
#[derive(Debug)]
struct CpuMiningStats {
    total_hashes: AtomicU64,
    solutions_found: AtomicU64,
    start_time: Instant,
}

impl CpuMiningStats {
    fn new() -> Self {
        Self {
            total_hashes: AtomicU64::new(0),
            solutions_found: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn to_mining_stats(&self) -> MiningStats {
        let total_hashes = self.total_hashes.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();

        MiningStats {
            total_hashes,
            solutions_found: self.solutions_found.load(Ordering::Relaxed),
            mining_time_secs: elapsed.as_secs(),
            average_hash_rate: compute_hash_rate(total_hashes, elapsed),
        }
    }
}

/// Try up to `attempts` random sealings of `block`.
///
/// Returns true with `block` holding the winning nonce and timestamp.
pub fn try_batch<R: Rng>(
    block: &mut Block,
    rng: &mut R,
    min_difficulty: Difficulty,
    attempts: u64,
) -> bool {
    for _ in 0..attempts {
        block.seal(Nonce::new(rng.random()), current_timestamp_millis());
        if meets_difficulty(&block.hash(), min_difficulty) {
            return true;
        }
    }
    false
}

/// Seal `template` on the current thread, blocking until a solution is found
pub fn solve(template: &Block, min_difficulty: Difficulty) -> Block {
    let mut rng = StdRng::from_os_rng();
    let mut block = template.clone();
    while !try_batch(&mut block, &mut rng, min_difficulty, BATCH_SIZE) {}
    block
}

impl CpuWorker {
    /// Create a new CPU worker with specified search task count, 0 means
    /// one per CPU
    pub fn new(thread_count: usize) -> Self {
        let thread_count = if thread_count == 0 {
            num_cpus::get()
        } else {
            thread_count
        };

        Self {
            thread_count,
            stats: Arc::new(CpuMiningStats::new()),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// One search task
    async fn search(
        thread_id: usize,
        template: Block,
        min_difficulty: Difficulty,
        stats: Arc<CpuMiningStats>,
        cancellation: CancellationToken,
        solution_tx: mpsc::UnboundedSender<Block>,
    ) {
        debug!("Starting search task {}", thread_id);

        let mut rng = StdRng::from_os_rng();
        let mut block = template;
        let mut batches = 0u64;

        loop {
            if cancellation.is_cancelled() {
                debug!("Search task {} cancelled after {} batches", thread_id, batches);
                return;
            }

            if try_batch(&mut block, &mut rng, min_difficulty, BATCH_SIZE) {
                stats.solutions_found.fetch_add(1, Ordering::Relaxed);
                debug!("Solution found by search task {} with nonce {:?}", thread_id, block.nonce);
                // Receiver is gone once another task has won
                let _ = solution_tx.send(block);
                return;
            }

            stats.total_hashes.fetch_add(BATCH_SIZE, Ordering::Relaxed);
            batches += 1;

            task::yield_now().await;
        }
    }
}

#[async_trait]
impl MiningWorker for CpuWorker {
    fn worker_type(&self) -> &'static str {
        "cpu"
    }

    async fn mine(
        &mut self,
        template: Block,
        min_difficulty: Difficulty,
        cancellation: CancellationToken,
        stats_tx: Option<mpsc::UnboundedSender<MiningStats>>,
    ) -> Result<Block> {
        info!(
            "Starting CPU mining with {} workers on height {} (minimum difficulty {})",
            self.thread_count, template.height, min_difficulty
        );

        self.stats = Arc::new(CpuMiningStats::new());
        let workers = cancellation.child_token();

        let (solution_tx, mut solution_rx) = mpsc::unbounded_channel();

        let mut handles = Vec::with_capacity(self.thread_count);
        for thread_id in 0..self.thread_count {
            handles.push(task::spawn(Self::search(
                thread_id,
                template.clone(),
                min_difficulty,
                Arc::clone(&self.stats),
                workers.clone(),
                solution_tx.clone(),
            )));
        }

        // The channel closes once every search task has exited
        drop(solution_tx);

        let stats_handle = stats_tx.map(|stats_tx| {
            let stats = Arc::clone(&self.stats);
            let workers = workers.clone();
            task::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(5));
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if stats_tx.send(stats.to_mining_stats()).is_err() {
                                break;
                            }
                        }
                        _ = workers.cancelled() => break,
                    }
                }
            })
        });

        // Cancellation also closes the solution channel, so check it first
        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(Error::cancelled("CPU mining")),
            solution = solution_rx.recv() => match solution {
                Some(block) => Ok(block),
                None => {
                    warn!("All search tasks exited without finding a solution");
                    Err(Error::worker("cpu", "No solution found"))
                }
            },
        };

        // Cleanup: stop the remaining search tasks and wait for them
        workers.cancel();

        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("Search task panicked: {}", e);
                }
            }
        }

        if let Some(handle) = stats_handle {
            let _ = handle.await;
        }

        let final_stats = self.stats.to_mining_stats();
        debug!(
            "CPU mining finished. Total attempts: {}, hash rate: {}",
            final_stats.total_hashes,
            format_hash_rate(final_stats.average_hash_rate)
        );

        result
    }

    fn stats(&self) -> MiningStats {
        self.stats.to_mining_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cpu_worker_creation() {
        let worker = CpuWorker::new(2);
        assert_eq!(worker.thread_count(), 2);
        assert_eq!(worker.worker_type(), "cpu");

        let worker = CpuWorker::new(0);
        assert_eq!(worker.thread_count(), num_cpus::get());
    }

    #[tokio::test]
    async fn test_cpu_worker_easy_mining() {
        let mut worker = CpuWorker::new(2);
        let parent = Block::genesis();
        let template = Block::extend(&parent).unwrap();

        let block = worker
            .mine(template, 6, CancellationToken::new(), None)
            .await
            .unwrap();

        assert!(block.difficulty() >= 6);
        assert!(block.is_child_of(&parent));
        assert!(block.nonce.is_some());
        assert!(block.created_at.is_some());
        assert_eq!(worker.stats().solutions_found, 1);
    }

    #[tokio::test]
    async fn test_cpu_worker_cancellation() {
        let mut worker = CpuWorker::new(1);
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let result = worker
            .mine(Block::extend(&Block::genesis()).unwrap(), 250, cancellation, None)
            .await;

        assert!(matches!(result, Err(Error::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_while_searching() {
        let mut worker = CpuWorker::new(2);
        let cancellation = CancellationToken::new();
        let canceller = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            worker.mine(Block::extend(&Block::genesis()).unwrap(), 250, cancellation, None),
        )
        .await
        .expect("cancellation was not observed");

        assert!(matches!(result, Err(Error::Cancelled { .. })));
    }

    #[test]
    fn test_cpu_mining_stats() {
        let stats = CpuMiningStats::new();
        stats.total_hashes.store(1000, Ordering::Relaxed);
        stats.solutions_found.store(1, Ordering::Relaxed);

        let mining_stats = stats.to_mining_stats();
        assert_eq!(mining_stats.total_hashes, 1000);
        assert_eq!(mining_stats.solutions_found, 1);
    }

    #[test]
    fn test_solve_blocking() {
        let template = Block::extend(&Block::genesis()).unwrap();
        let block = solve(&template, 8);
        assert!(block.difficulty() >= 8);
        assert_eq!(block.previous_hash, template.previous_hash);
    }
}
