// crates/tessel-sync/src/queue.rs
//
// Bounded background queue for repair passes.
//
// The coordinator hands suspect fields to `schedule` and returns to its
// caller immediately. A fixed pool of worker tasks drains the queue, one
// repair pass per job. When the queue is full the job is dropped: the
// divergence it described is still on disk and the next read re-detects it.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::repair::{RepairItem, Repairer};

/// Handle for submitting repair jobs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RepairQueue {
    tx: mpsc::Sender<Vec<RepairItem>>,
}

impl RepairQueue {
    /// Spawn `workers` tasks draining a queue of at most `capacity` jobs.
    ///
    /// Workers exit once every `RepairQueue` handle has been dropped.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `workers` is 0.
    pub fn start(repairer: Arc<Repairer>, capacity: usize, workers: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        assert!(workers > 0, "workers must be > 0");

        let (tx, rx) = mpsc::channel::<Vec<RepairItem>>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..workers {
            let rx = rx.clone();
            let repairer = repairer.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(items) = job else { break };
                    let count = items.len();
                    match repairer.repair(items).await {
                        Ok(report) => tracing::debug!(
                            "Repair worker {} finished {} item(s): {:?}",
                            worker,
                            count,
                            report
                        ),
                        Err(e) => tracing::warn!("Repair worker {} failed: {}", worker, e),
                    }
                }
                tracing::debug!("Repair worker {} stopped", worker);
            });
        }
        Self { tx }
    }

    /// Enqueue a repair job without waiting. Returns `false` if it was dropped.
    pub fn schedule(&self, items: Vec<RepairItem>) -> bool {
        if items.is_empty() {
            return true;
        }
        match self.tx.try_send(items) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(items)) => {
                tracing::warn!("Repair queue full; dropping job of {} item(s)", items.len());
                false
            }
            Err(mpsc::error::TrySendError::Closed(items)) => {
                tracing::warn!("Repair queue closed; dropping job of {} item(s)", items.len());
                false
            }
        }
    }

    /// Free slots left in the queue.
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }
}
