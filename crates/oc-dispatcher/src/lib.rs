//! The priority rate-limited dispatcher (C3): a single cooperative worker
//! task that drains fourteen priority-ordered bucket queues at a fixed
//! minimum spacing, checkpointing ("rotating") its run bookkeeping
//! periodically so it behaves like a long-lived durable workflow without
//! actually depending on one.

mod error;
mod handle;
mod signal;
mod worker;

pub use error::DispatcherError;
pub use handle::{DispatcherHandle, WorkerGone};
pub use signal::Signal;
pub use worker::{Worker, MAX_ITEMS_PER_RUN, MAX_RUN_SECONDS, MIN_SPACING, TICK};

use tokio::sync::mpsc;

/// Spawns a worker task and returns a handle to it.
pub fn spawn(http: reqwest::Client) -> DispatcherHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = Worker::new(http);
    tokio::spawn(worker.run(rx));
    DispatcherHandle::new(tx)
}
