//! The work queue: sole hand-off point between the scheduler and the worker
//! pool.
//!
//! Producer and consumer halves are distinct types so the channel closes as
//! soon as every producer is gone; workers use the closed queue as their
//! shutdown signal. Each queued id is delivered to exactly one worker; the
//! exclusive claim in the ledger is the second line of defense.

use std::sync::Arc;

use metrics::gauge;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

const METRIC_QUEUE_DEPTH: &str = "mapforge_queue_depth";

#[derive(Debug, Error)]
#[error("work queue closed")]
pub struct QueueClosed;

/// Producer half, held by the scheduler.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Uuid>,
}

/// Consumer half, shared by the worker pool.
#[derive(Clone)]
pub struct WorkConsumer {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Uuid>>>,
}

/// Create a connected producer/consumer pair.
pub fn work_queue() -> (WorkQueue, WorkConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        WorkQueue { tx },
        WorkConsumer {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl WorkQueue {
    pub fn enqueue(&self, job_id: Uuid) -> Result<(), QueueClosed> {
        self.tx.send(job_id).map_err(|_| QueueClosed)?;
        gauge!(METRIC_QUEUE_DEPTH).increment(1.0);
        Ok(())
    }
}

impl WorkConsumer {
    /// Block until the next job id is available.
    ///
    /// `None` once every producer is gone and the queue is drained.
    pub async fn dequeue(&self) -> Option<Uuid> {
        let job_id = self.rx.lock().await.recv().await?;
        gauge!(METRIC_QUEUE_DEPTH).decrement(1.0);
        Some(job_id)
    }
}
