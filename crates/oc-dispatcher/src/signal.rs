use std::collections::BTreeMap;

use oc_schemas::DispatcherStats;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::DispatcherError;

/// Messages sent to a running [`crate::worker::Worker`] over its mailbox.
/// Submit/Close/PauseBuckets/ResumeBuckets/SetPriorityOrder are signals
/// (fire-and-forget from the caller's perspective, acked via the reply
/// channel); QueueSize/Stats are queries.
pub enum Signal {
    Submit {
        bucket: String,
        payload: Value,
        reply: oneshot::Sender<Result<(), DispatcherError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    PauseBuckets {
        buckets: Vec<String>,
        reply: oneshot::Sender<()>,
    },
    ResumeBuckets {
        buckets: Vec<String>,
        reply: oneshot::Sender<()>,
    },
    SetPriorityOrder {
        order: Vec<String>,
        reply: oneshot::Sender<Result<(), DispatcherError>>,
    },
    QueueSize {
        reply: oneshot::Sender<BTreeMap<String, usize>>,
    },
    Stats {
        reply: oneshot::Sender<DispatcherStats>,
    },
}
