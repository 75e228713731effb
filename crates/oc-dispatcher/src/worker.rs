use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use chrono::Utc;
use oc_config::PriorityOrder;
use oc_envelope::{from_mapping, to_dispatch_payload};
use oc_schemas::{DispatcherStats, EnvelopeWire};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DispatcherError;
use crate::signal::Signal;

/// Minimum time between two dispatched activity calls, regardless of how
/// many buckets have eligible work.
pub const MIN_SPACING: Duration = Duration::from_secs(1);
/// How often the worker wakes up to check for dispatchable work.
pub const TICK: Duration = Duration::from_millis(200);
/// Checkpoint/rotate ("continue-as-new") after this many dispatches in one run.
pub const MAX_ITEMS_PER_RUN: u64 = 400;
/// ...or after this many seconds, whichever comes first.
pub const MAX_RUN_SECONDS: u64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Running,
    Closed,
}

/// The PRD worker: a single task owning every bucket queue, the priority
/// order, and the pacing clock. All mutation happens through signals
/// received on its mailbox — there is no shared mutable state, so there is
/// nothing to lock.
pub struct Worker {
    queues: BTreeMap<String, VecDeque<EnvelopeWire>>,
    priority_order: PriorityOrder,
    paused: HashSet<String>,
    state: WorkerState,
    run_id: Uuid,
    run_started_at: Instant,
    items_this_run: u64,
    total_dispatched: u64,
    last_dispatch_at: Option<Instant>,
    last_dispatch_at_utc: Option<chrono::DateTime<Utc>>,
    http: reqwest::Client,
}

impl Worker {
    pub fn new(http: reqwest::Client) -> Self {
        let priority_order = PriorityOrder::default();
        let queues = priority_order
            .as_slice()
            .iter()
            .map(|b| (b.clone(), VecDeque::new()))
            .collect();
        Self {
            queues,
            priority_order,
            paused: HashSet::new(),
            state: WorkerState::Running,
            run_id: Uuid::new_v4(),
            run_started_at: Instant::now(),
            items_this_run: 0,
            total_dispatched: 0,
            last_dispatch_at: None,
            last_dispatch_at_utc: None,
            http,
        }
    }

    /// Drives the worker until the signal channel is dropped, or until a
    /// `Close` signal has been received *and* every queue has drained —
    /// closing never cuts off work already queued. Intended to run as its
    /// own `tokio::spawn`ed task.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Signal>) {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(run_id = %self.run_id, "dispatcher worker starting");
        loop {
            tokio::select! {
                signal = rx.recv() => {
                    match signal {
                        Some(signal) => self.handle_signal(signal),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.maybe_rotate();
                    self.maybe_dispatch().await;
                }
            }
            if self.state == WorkerState::Closed && self.total_queue_size() == 0 {
                break;
            }
        }
        info!(run_id = %self.run_id, "dispatcher worker stopped");
    }

    /// Handles one signal. Closing only flips the state flag — the loop in
    /// `run()` decides when an empty, closed queue actually terminates the
    /// run, so an in-progress drain is never interrupted.
    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Submit {
                bucket,
                payload,
                reply,
            } => {
                let result = self.submit(&bucket, &payload);
                let _ = reply.send(result);
            }
            Signal::Close { reply } => {
                self.state = WorkerState::Closed;
                let _ = reply.send(());
            }
            Signal::PauseBuckets { buckets, reply } => {
                for b in buckets {
                    self.paused.insert(b);
                }
                let _ = reply.send(());
            }
            Signal::ResumeBuckets { buckets, reply } => {
                for b in &buckets {
                    self.paused.remove(b);
                }
                let _ = reply.send(());
            }
            Signal::SetPriorityOrder { order, reply } => {
                let result = self
                    .priority_order
                    .set_order(order)
                    .map_err(|e| DispatcherError::BadInput(e.to_string()));
                let _ = reply.send(result);
            }
            Signal::QueueSize { reply } => {
                let sizes = self.queue_sizes();
                let _ = reply.send(sizes);
            }
            Signal::Stats { reply } => {
                let stats = self.stats();
                let _ = reply.send(stats);
            }
        }
    }

    /// `submit` is a no-op once the worker is closed — new work is dropped
    /// silently rather than rejected, so callers racing a shutdown don't see
    /// spurious errors for work that was never going to run.
    fn submit(&mut self, bucket: &str, payload: &Value) -> Result<(), DispatcherError> {
        if self.state == WorkerState::Closed {
            return Ok(());
        }
        let envelope = from_mapping(bucket, payload).map_err(|e| DispatcherError::BadInput(e.to_string()))?;
        self.queues
            .entry(bucket.to_string())
            .or_default()
            .push_back(envelope);
        Ok(())
    }

    fn queue_sizes(&self) -> BTreeMap<String, usize> {
        self.queues.iter().map(|(k, v)| (k.clone(), v.len())).collect()
    }

    fn total_queue_size(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            run_id: self.run_id,
            total_dispatched: self.total_dispatched,
            items_this_run: self.items_this_run,
            queue_sizes: self.queue_sizes(),
            paused_buckets: self.paused.iter().cloned().collect(),
            priority_order: self.priority_order.as_slice().to_vec(),
            closed: self.state == WorkerState::Closed,
            last_dispatch_at: self.last_dispatch_at_utc,
        }
    }

    /// Rotation ("continue-as-new"): once a run has dispatched
    /// `MAX_ITEMS_PER_RUN` items or run for `MAX_RUN_SECONDS`, start a fresh
    /// run_id and counters. Queue contents and pacing state carry over
    /// untouched — only the run bookkeeping resets.
    fn maybe_rotate(&mut self) {
        let elapsed = self.run_started_at.elapsed().as_secs();
        if self.items_this_run >= MAX_ITEMS_PER_RUN || elapsed >= MAX_RUN_SECONDS {
            let old_run = self.run_id;
            self.run_id = Uuid::new_v4();
            self.run_started_at = Instant::now();
            self.items_this_run = 0;
            info!(old_run_id = %old_run, new_run_id = %self.run_id, "dispatcher run rotated");
        }
    }

    async fn maybe_dispatch(&mut self) {
        if let Some(last) = self.last_dispatch_at {
            if last.elapsed() < MIN_SPACING {
                return;
            }
        }

        let non_empty = |b: &str| self.queues.get(b).map(|q| !q.is_empty()).unwrap_or(false);
        let paused = |b: &str| self.paused.contains(b);
        let Some(bucket) = self.priority_order.next_non_empty(non_empty, paused).map(str::to_string) else {
            return;
        };

        let Some(envelope) = self.queues.get_mut(&bucket).and_then(VecDeque::pop_front) else {
            return;
        };

        self.last_dispatch_at = Some(Instant::now());
        self.last_dispatch_at_utc = Some(Utc::now());
        self.items_this_run += 1;
        self.total_dispatched += 1;

        self.dispatch(envelope).await;
    }

    /// Fires the outbound activity call. Popped before the call is made —
    /// at-most-once: a failure here is logged and reported, never requeued.
    async fn dispatch(&self, envelope: EnvelopeWire) {
        let (url, body) = to_dispatch_payload(&envelope);
        let req = if envelope.method.eq_ignore_ascii_case("GET") {
            self.http.get(&url).query(&envelope.params)
        } else {
            self.http
                .request(
                    envelope
                        .method
                        .parse()
                        .unwrap_or(reqwest::Method::POST),
                    &url,
                )
                .json(&body)
        };

        match req.timeout(Duration::from_secs(10)).send().await {
            Ok(resp) => {
                let status = resp.status();
                info!(bucket = %envelope.bucket, url = %url, status = %status, "envelope dispatched");
            }
            Err(err) => {
                warn!(bucket = %envelope.bucket, url = %url, error = %err, "envelope dispatch failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::DispatcherHandle;
    use serde_json::json;

    #[test]
    fn fifo_within_bucket() {
        let mut worker = Worker::new(reqwest::Client::new());
        worker
            .submit("regular", &json!({"url_callback": "/a"}))
            .unwrap();
        worker
            .submit("regular", &json!({"url_callback": "/b"}))
            .unwrap();
        let first = worker.queues.get_mut("regular").unwrap().pop_front().unwrap();
        assert_eq!(first.url_callback, "/a");
    }

    #[test]
    fn priority_preempts_lower_bucket() {
        let mut worker = Worker::new(reqwest::Client::new());
        worker
            .submit("regular", &json!({"url_callback": "/low"}))
            .unwrap();
        worker
            .submit("position_prior", &json!({"url_callback": "/high"}))
            .unwrap();
        let non_empty = |b: &str| worker.queues.get(b).map(|q| !q.is_empty()).unwrap_or(false);
        let next = worker
            .priority_order
            .next_non_empty(non_empty, |_| false)
            .unwrap();
        assert_eq!(next, "position_prior");
    }

    #[test]
    fn paused_bucket_is_skipped() {
        let mut worker = Worker::new(reqwest::Client::new());
        worker
            .submit("position_prior", &json!({"url_callback": "/high"}))
            .unwrap();
        worker
            .submit("regular", &json!({"url_callback": "/low"}))
            .unwrap();
        worker.paused.insert("position_prior".to_string());
        let non_empty = |b: &str| worker.queues.get(b).map(|q| !q.is_empty()).unwrap_or(false);
        let paused = |b: &str| worker.paused.contains(b);
        let next = worker.priority_order.next_non_empty(non_empty, paused).unwrap();
        assert_eq!(next, "regular");
    }

    #[test]
    fn rotation_resets_counters_but_keeps_queue() {
        let mut worker = Worker::new(reqwest::Client::new());
        worker
            .submit("regular", &json!({"url_callback": "/a"}))
            .unwrap();
        worker.items_this_run = MAX_ITEMS_PER_RUN;
        let old_run = worker.run_id;
        worker.maybe_rotate();
        assert_ne!(worker.run_id, old_run);
        assert_eq!(worker.items_this_run, 0);
        assert_eq!(worker.queues.get("regular").unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn min_spacing_blocks_back_to_back_dispatch() {
        let mut worker = Worker::new(reqwest::Client::new());
        worker
            .submit("regular", &json!({"url_callback": "http://127.0.0.1:0/a"}))
            .unwrap();
        worker
            .submit("regular", &json!({"url_callback": "http://127.0.0.1:0/b"}))
            .unwrap();

        worker.maybe_dispatch().await;
        assert_eq!(worker.total_dispatched, 1);
        assert_eq!(worker.queues.get("regular").unwrap().len(), 1);

        worker.maybe_dispatch().await;
        assert_eq!(worker.total_dispatched, 1, "second dispatch should be blocked by MIN_SPACING");

        tokio::time::advance(MIN_SPACING).await;
        worker.maybe_dispatch().await;
        assert_eq!(worker.total_dispatched, 2);
    }

    #[test]
    fn submit_rejects_bad_envelope() {
        let mut worker = Worker::new(reqwest::Client::new());
        assert!(worker.submit("regular", &json!({})).is_err());
    }

    #[test]
    fn submit_is_a_silent_no_op_once_closed() {
        let mut worker = Worker::new(reqwest::Client::new());
        worker.state = WorkerState::Closed;
        assert!(worker.submit("regular", &json!({"url_callback": "/a"})).is_ok());
        assert_eq!(worker.queues.get("regular").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn close_drains_queued_work_before_stopping() {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker::new(reqwest::Client::new());
        let handle = DispatcherHandle::new(tx);
        let task = tokio::spawn(worker.run(rx));

        handle
            .submit("regular".to_string(), json!({"url_callback": "http://127.0.0.1:0/a"}))
            .await
            .unwrap();
        handle.close().await.unwrap();

        // the item queued before close is still sitting there right after
        // the close signal is handled — closing does not wipe the queue.
        assert_eq!(handle.queue_size().await.unwrap().get("regular"), Some(&1));

        // submissions after close are dropped silently, not rejected.
        handle
            .submit("regular".to_string(), json!({"url_callback": "http://127.0.0.1:0/b"}))
            .await
            .unwrap();

        // the worker keeps ticking until it has drained the queue, then stops.
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("worker should drain the queued item and stop")
            .expect("worker task should not panic");
    }

    #[tokio::test]
    async fn queue_size_reflects_submissions() {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker::new(reqwest::Client::new());
        let handle = DispatcherHandle::new(tx);
        let task = tokio::spawn(worker.run(rx));
        handle
            .submit("regular".to_string(), json!({"url_callback": "/a"}))
            .await
            .unwrap();
        let sizes = handle.queue_size().await.unwrap();
        assert_eq!(sizes.get("regular"), Some(&1));
        handle.close().await.unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
    }
}
