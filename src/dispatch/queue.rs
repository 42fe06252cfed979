//! Worker pool bound to one packet type
//!
//! Entries are sharded by endpoint and every shard is drained by exactly one
//! worker task, so packets from one client are handled in arrival order while
//! different clients proceed in parallel.

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use super::{DispatchError, PacketHandler, PacketQueueEntry};
use crate::client::Client;
use crate::packets::PacketId;
use crate::util::time::Timer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueConfig {
    /// Poll period; workers also wake as soon as an entry arrives
    pub sleep_interval: Duration,
    pub worker_count: usize,
    /// Total pending entries across all shards
    pub capacity: usize,
    /// Entries taken per wake-up before yielding
    pub batch_size: usize,
    /// Handler runs longer than this are logged
    pub handler_budget: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            sleep_interval: Duration::from_millis(10),
            worker_count: 1,
            capacity: 4096,
            batch_size: 64,
            handler_budget: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub packet: PacketId,
    pub workers: usize,
    pub pending: usize,
    pub enqueued: u64,
    pub handled: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

struct Shard {
    entries: Mutex<VecDeque<PacketQueueEntry>>,
    notify: Notify,
}

struct QueueInner {
    packet_id: PacketId,
    handler: Arc<dyn PacketHandler>,
    config: QueueConfig,
    shard_capacity: usize,
    shards: Vec<Shard>,
    sequence: AtomicU64,
    stopped: AtomicBool,
    counters: Counters,
}

pub struct WorkerQueue {
    inner: Arc<QueueInner>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerQueue {
    /// Spawn the worker tasks. Must be called inside a tokio runtime.
    pub fn start(packet_id: PacketId, handler: Arc<dyn PacketHandler>, config: QueueConfig) -> Self {
        let worker_count = config.worker_count.max(1);
        let shard_capacity = config.capacity.max(1).div_ceil(worker_count);
        let inner = Arc::new(QueueInner {
            packet_id,
            handler,
            config,
            shard_capacity,
            shards: (0..worker_count)
                .map(|_| Shard {
                    entries: Mutex::new(VecDeque::new()),
                    notify: Notify::new(),
                })
                .collect(),
            sequence: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let workers = (0..worker_count)
            .map(|index| tokio::spawn(run_worker(inner.clone(), index, shutdown_rx.clone())))
            .collect();

        debug!(packet = %packet_id, workers = worker_count, "Packet queue started");
        Self {
            inner,
            shutdown,
            workers: Mutex::new(workers),
        }
    }

    pub fn packet_id(&self) -> PacketId {
        self.inner.packet_id
    }

    /// Append an entry for `client`. Never waits for a worker.
    pub fn enqueue(&self, client: Arc<Client>, payload: Bytes) -> Result<u64, DispatchError> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::Acquire) {
            return Err(DispatchError::Stopped(inner.packet_id));
        }

        let shard = &inner.shards[client.endpoint().0 as usize % inner.shards.len()];
        let sequence = {
            let mut entries = shard.entries.lock();
            if entries.len() >= inner.shard_capacity {
                inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(DispatchError::QueueFull(inner.packet_id));
            }
            let sequence = inner.sequence.fetch_add(1, Ordering::Relaxed);
            entries.push_back(PacketQueueEntry {
                client,
                packet_id: inner.packet_id,
                payload,
                sequence,
            });
            sequence
        };

        inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        shard.notify.notify_one();
        Ok(sequence)
    }

    /// Refuse new entries and tell workers to stop after their current entry
    pub fn signal_stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);
    }

    /// Stop and wait for in-flight handler calls to finish
    pub async fn shutdown(&self) {
        self.signal_stop();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!(packet = %self.inner.packet_id, error = %e, "Packet worker ended abnormally");
            }
        }
        debug!(packet = %self.inner.packet_id, "Packet queue stopped");
    }

    pub fn stats(&self) -> QueueStats {
        let inner = &self.inner;
        QueueStats {
            packet: inner.packet_id,
            workers: inner.shards.len(),
            pending: inner.shards.iter().map(|s| s.entries.lock().len()).sum(),
            enqueued: inner.counters.enqueued.load(Ordering::Relaxed),
            handled: inner.counters.handled.load(Ordering::Relaxed),
            failed: inner.counters.failed.load(Ordering::Relaxed),
            dropped: inner.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerQueue {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

async fn run_worker(inner: Arc<QueueInner>, index: usize, mut shutdown: watch::Receiver<bool>) {
    let shard = &inner.shards[index];
    let mut ticker = interval(inner.config.sleep_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    'work: loop {
        loop {
            let batch: Vec<PacketQueueEntry> = {
                let mut entries = shard.entries.lock();
                let take = entries.len().min(inner.config.batch_size.max(1));
                entries.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }

            let total = batch.len();
            for (done, entry) in batch.into_iter().enumerate() {
                if *shutdown.borrow() {
                    let abandoned = total - done + shard.entries.lock().len();
                    inner
                        .counters
                        .dropped
                        .fetch_add(abandoned as u64, Ordering::Relaxed);
                    break 'work;
                }
                inner.process(&entry);
            }

            // handlers are synchronous; let other tasks run between batches
            tokio::task::yield_now().await;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = shard.notify.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

impl QueueInner {
    fn process(&self, entry: &PacketQueueEntry) {
        let timer = Timer::new();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.handler.handle(entry)));

        match outcome {
            Ok(Ok(())) => {
                self.counters.handled.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    packet = %self.packet_id,
                    client = %entry.client.endpoint(),
                    sequence = entry.sequence,
                    error = %format!("{e:#}"),
                    "Packet handler failed"
                );
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    packet = %self.packet_id,
                    client = %entry.client.endpoint(),
                    sequence = entry.sequence,
                    "Packet handler panicked"
                );
            }
        }

        let elapsed = timer.elapsed();
        if elapsed > self.config.handler_budget {
            warn!(
                packet = %self.packet_id,
                client = %entry.client.endpoint(),
                elapsed_us = elapsed.as_micros() as u64,
                budget_us = self.config.handler_budget.as_micros() as u64,
                "Packet handler over budget"
            );
        }
    }
}
