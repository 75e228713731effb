use std::collections::BTreeMap;

use oc_schemas::DispatcherStats;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::DispatcherError;
use crate::signal::Signal;

/// Cheaply cloneable front-end to a running dispatcher worker. All methods
/// send a signal over the worker's mailbox and await its reply, so callers
/// (the daemon's HTTP handlers, the CLI) never touch the worker's internal
/// state directly.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Signal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerGone;

impl std::fmt::Display for WorkerGone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dispatcher worker task is no longer running")
    }
}
impl std::error::Error for WorkerGone {}

impl DispatcherHandle {
    pub fn new(tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { tx }
    }

    pub async fn submit(&self, bucket: String, payload: Value) -> Result<(), DispatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Signal::Submit {
                bucket,
                payload,
                reply,
            })
            .map_err(|_| DispatcherError::Fatal(WorkerGone.to_string()))?;
        rx.await
            .map_err(|_| DispatcherError::Fatal(WorkerGone.to_string()))?
    }

    pub async fn close(&self) -> Result<(), WorkerGone> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Signal::Close { reply }).map_err(|_| WorkerGone)?;
        rx.await.map_err(|_| WorkerGone)
    }

    pub async fn pause_buckets(&self, buckets: Vec<String>) -> Result<(), WorkerGone> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Signal::PauseBuckets { buckets, reply })
            .map_err(|_| WorkerGone)?;
        rx.await.map_err(|_| WorkerGone)
    }

    pub async fn resume_buckets(&self, buckets: Vec<String>) -> Result<(), WorkerGone> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Signal::ResumeBuckets { buckets, reply })
            .map_err(|_| WorkerGone)?;
        rx.await.map_err(|_| WorkerGone)
    }

    pub async fn set_priority_order(&self, order: Vec<String>) -> Result<(), DispatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Signal::SetPriorityOrder { order, reply })
            .map_err(|_| DispatcherError::Fatal(WorkerGone.to_string()))?;
        rx.await
            .map_err(|_| DispatcherError::Fatal(WorkerGone.to_string()))?
    }

    pub async fn queue_size(&self) -> Result<BTreeMap<String, usize>, WorkerGone> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Signal::QueueSize { reply })
            .map_err(|_| WorkerGone)?;
        rx.await.map_err(|_| WorkerGone)
    }

    pub async fn stats(&self) -> Result<DispatcherStats, WorkerGone> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Signal::Stats { reply })
            .map_err(|_| WorkerGone)?;
        rx.await.map_err(|_| WorkerGone)
    }
}
