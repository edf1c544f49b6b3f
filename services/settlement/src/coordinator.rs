//! Settlement coordinator
//!
//! A dispatcher feeds a bounded pool of shard workers. Jobs shard by
//! min(buyer, seller) so trades touching the same pair of wallets apply
//! in production order; each shard processes serially. When every shard
//! queue is full the dispatcher blocks, which in turn blocks the engine's
//! trade handoff: matching pauses until settlement drains.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use types::trade::SettlementJob;

use crate::saga::{SagaOutcome, Settler};

/// Coordinator tunables
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Number of shard workers
    pub workers: usize,
    /// Depth of the intake queue and of each shard queue
    pub queue_depth: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 256,
        }
    }
}

/// Spawns and wires the settlement worker pool
pub struct SettlementCoordinator;

impl SettlementCoordinator {
    /// Start the dispatcher and shard workers; returns the job sender
    /// handed to the matching engine.
    pub fn spawn(settler: Arc<Settler>, config: CoordinatorConfig) -> mpsc::Sender<SettlementJob> {
        let workers = config.workers.max(1);
        let (job_tx, mut job_rx) = mpsc::channel::<SettlementJob>(config.queue_depth);

        let shard_txs: Vec<mpsc::Sender<SettlementJob>> = (0..workers)
            .map(|shard| {
                let (tx, rx) = mpsc::channel::<SettlementJob>(config.queue_depth);
                tokio::spawn(shard_loop(shard, Arc::clone(&settler), rx));
                tx
            })
            .collect();

        tokio::spawn(async move {
            info!(workers, "Settlement coordinator started");
            while let Some(job) = job_rx.recv().await {
                let idx = (shard_key(&job) % workers as u64) as usize;
                if shard_txs[idx].send(job).await.is_err() {
                    error!(shard = idx, "Settlement shard died, stopping dispatcher");
                    return;
                }
            }
            info!("Settlement coordinator stopped");
        });

        job_tx
    }
}

/// Shard assignment preserving per-wallet-pair causality
fn shard_key(job: &SettlementJob) -> u64 {
    match job {
        SettlementJob::Trade(bundle) => {
            let a = bundle.trade.buyer_id.as_i64();
            let b = bundle.trade.seller_id.as_i64();
            a.min(b) as u64
        }
        SettlementJob::CancelResidual { user_id, .. } => user_id.as_i64() as u64,
    }
}

async fn shard_loop(shard: usize, settler: Arc<Settler>, mut rx: mpsc::Receiver<SettlementJob>) {
    while let Some(job) = rx.recv().await {
        match job {
            SettlementJob::Trade(bundle) => {
                match settler.settle(&bundle).await {
                    SagaOutcome::Settled => {
                        debug!(shard, buy_tx_id = %bundle.trade.buy_tx_id, "Trade settled");
                    }
                    SagaOutcome::Aborted { step } => {
                        warn!(
                            shard,
                            buy_tx_id = %bundle.trade.buy_tx_id,
                            sell_tx_id = %bundle.trade.sell_tx_id,
                            step,
                            "Trade aborted and compensated"
                        );
                    }
                }
            }
            SettlementJob::CancelResidual {
                stock_tx_id,
                user_id,
                stock_id,
                side,
                residual,
                reason,
            } => {
                settler
                    .cancel_residual(stock_tx_id, user_id, stock_id, side, residual, &reason)
                    .await;
            }
        }
    }
    debug!(shard, "Settlement shard stopped");
}
