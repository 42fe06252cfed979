//! Packet reduction and dispatch
//!
//! Inbound packets are routed by packet id into one [`WorkerQueue`] per
//! registered type. Queues share nothing, so a slow handler for one packet
//! type never holds up another.

mod queue;

pub use queue::{QueueConfig, QueueStats, WorkerQueue};

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::Client;
use crate::packets::PacketId;

/// One inbound packet waiting for its handler
#[derive(Clone)]
pub struct PacketQueueEntry {
    pub client: Arc<Client>,
    pub packet_id: PacketId,
    pub payload: Bytes,
    /// Monotonic per queue
    pub sequence: u64,
}

/// Handler bound to a queue. Errors and panics are logged by the worker,
/// which then moves on to the next entry.
pub trait PacketHandler: Send + Sync {
    fn handle(&self, entry: &PacketQueueEntry) -> anyhow::Result<()>;
}

impl<F> PacketHandler for F
where
    F: Fn(&PacketQueueEntry) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, entry: &PacketQueueEntry) -> anyhow::Result<()> {
        self(entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("No handler registered for {0}")]
    Unregistered(PacketId),

    #[error("Queue for {0} is full")]
    QueueFull(PacketId),

    #[error("Queue for {0} is shutting down")]
    Stopped(PacketId),
}

#[derive(Default)]
pub struct PacketReducer {
    queues: RwLock<HashMap<PacketId, Arc<WorkerQueue>>>,
}

impl PacketReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `packet_id` with its own worker pool. A previous
    /// binding is replaced; its workers finish their current entry and stop.
    pub fn register(&self, packet_id: PacketId, handler: Arc<dyn PacketHandler>, config: QueueConfig) {
        let queue = Arc::new(WorkerQueue::start(packet_id, handler, config));
        let previous = self.queues.write().insert(packet_id, queue);

        if let Some(previous) = previous {
            previous.signal_stop();
            info!(packet = %packet_id, "Packet handler replaced");
        } else {
            debug!(packet = %packet_id, workers = config.worker_count, "Packet handler registered");
        }
    }

    pub fn is_registered(&self, packet_id: PacketId) -> bool {
        self.queues.read().contains_key(&packet_id)
    }

    /// Hand an inbound packet to its queue
    pub fn enqueue(
        &self,
        client: Arc<Client>,
        packet_id: PacketId,
        payload: Bytes,
    ) -> Result<u64, DispatchError> {
        let queue = self
            .queues
            .read()
            .get(&packet_id)
            .cloned()
            .ok_or(DispatchError::Unregistered(packet_id))?;
        queue.enqueue(client, payload)
    }

    pub fn stats(&self) -> Vec<QueueStats> {
        let mut stats: Vec<QueueStats> = self.queues.read().values().map(|q| q.stats()).collect();
        stats.sort_by_key(|s| s.packet);
        stats
    }

    /// Stop every queue and wait for in-flight handlers
    pub async fn shutdown(&self) {
        let queues: Vec<Arc<WorkerQueue>> = self.queues.write().drain().map(|(_, q)| q).collect();
        join_all(queues.iter().map(|q| q.shutdown())).await;
        info!(queues = queues.len(), "Packet dispatch stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::EndpointId;
    use crate::util::rate_limit::PacketRateLimiter;
    use crate::world::ElementId;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn client(endpoint: u64) -> Arc<Client> {
        Arc::new(Client::new(
            EndpointId(endpoint),
            ElementId(endpoint as u32),
            PacketRateLimiter::default(),
        ))
    }

    fn config(workers: usize) -> QueueConfig {
        QueueConfig {
            sleep_interval: Duration::from_millis(1),
            worker_count: workers,
            ..QueueConfig::default()
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    type Seen = Arc<Mutex<Vec<(EndpointId, u8)>>>;

    fn recording_handler(seen: Seen) -> Arc<dyn PacketHandler> {
        Arc::new(move |entry: &PacketQueueEntry| {
            seen.lock().push((entry.client.endpoint(), entry.payload[0]));
            Ok(())
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn per_client_order_is_preserved() {
        let reducer = PacketReducer::new();
        let seen: Seen = Arc::default();
        reducer.register(PacketId::PlayerPureSync, recording_handler(seen.clone()), config(3));

        let clients: Vec<_> = (1..=5).map(client).collect();
        for n in 0..100u8 {
            for c in &clients {
                reducer
                    .enqueue(c.clone(), PacketId::PlayerPureSync, Bytes::from(vec![n]))
                    .unwrap();
            }
        }

        wait_for(|| seen.lock().len() == 500).await;
        let seen = seen.lock();
        for c in &clients {
            let order: Vec<u8> = seen
                .iter()
                .filter(|(e, _)| *e == c.endpoint())
                .map(|(_, n)| *n)
                .collect();
            assert_eq!(order, (0..100).collect::<Vec<u8>>());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_keep_each_client_in_order() {
        let reducer = Arc::new(PacketReducer::new());
        let seen: Arc<Mutex<Vec<(EndpointId, u16)>>> = Arc::default();
        let recorder = seen.clone();
        let handler: Arc<dyn PacketHandler> = Arc::new(move |entry: &PacketQueueEntry| {
            let n = u16::from_le_bytes([entry.payload[0], entry.payload[1]]);
            recorder.lock().push((entry.client.endpoint(), n));
            Ok(())
        });
        reducer.register(PacketId::VehiclePureSync, handler, config(3));

        let producers: Vec<_> = (1..=6u64)
            .map(|endpoint| {
                let reducer = reducer.clone();
                std::thread::spawn(move || {
                    let c = client(endpoint);
                    for n in 0..300u16 {
                        reducer
                            .enqueue(
                                c.clone(),
                                PacketId::VehiclePureSync,
                                Bytes::copy_from_slice(&n.to_le_bytes()),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        wait_for(|| reducer.stats()[0].handled == 1800).await;
        let seen = seen.lock();
        for endpoint in 1..=6u64 {
            let order: Vec<u16> = seen
                .iter()
                .filter(|(e, _)| *e == EndpointId(endpoint))
                .map(|(_, n)| *n)
                .collect();
            assert_eq!(order, (0..300).collect::<Vec<u16>>());
        }
        assert_eq!(seen.len(), 1800);
        let stats = reducer.stats()[0];
        assert_eq!(stats.enqueued, 1800);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_do_not_stop_the_worker() {
        let reducer = PacketReducer::new();
        let handler: Arc<dyn PacketHandler> = Arc::new(|entry: &PacketQueueEntry| match entry.payload[0] {
            0 => anyhow::bail!("bad packet"),
            1 => panic!("handler bug"),
            _ => Ok(()),
        });
        reducer.register(PacketId::PlayerKeySync, handler, config(1));

        for byte in [0u8, 1, 2, 2] {
            reducer
                .enqueue(client(1), PacketId::PlayerKeySync, Bytes::from(vec![byte]))
                .unwrap();
        }

        wait_for(|| {
            let stats = reducer.stats()[0];
            stats.handled + stats.failed == 4
        })
        .await;
        let stats = reducer.stats()[0];
        assert_eq!(stats.handled, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.enqueued, 4);
    }

    #[tokio::test]
    async fn unregistered_packets_are_rejected() {
        let reducer = PacketReducer::new();
        assert_eq!(
            reducer.enqueue(client(1), PacketId::CameraSync, Bytes::new()),
            Err(DispatchError::Unregistered(PacketId::CameraSync))
        );
    }

    #[tokio::test]
    async fn full_queue_rejects_new_entries() {
        let reducer = PacketReducer::new();
        let gate = Arc::new(std::sync::Barrier::new(2));
        let worker_gate = gate.clone();
        let blocking: Arc<dyn PacketHandler> = Arc::new(move |_: &PacketQueueEntry| {
            worker_gate.wait();
            Ok(())
        });
        reducer.register(
            PacketId::Command,
            blocking,
            QueueConfig {
                capacity: 2,
                ..config(1)
            },
        );

        // current-thread runtime: the worker cannot run until we await
        let c = client(1);
        assert!(reducer.enqueue(c.clone(), PacketId::Command, Bytes::new()).is_ok());
        assert!(reducer.enqueue(c.clone(), PacketId::Command, Bytes::new()).is_ok());
        assert_eq!(
            reducer.enqueue(c.clone(), PacketId::Command, Bytes::new()),
            Err(DispatchError::QueueFull(PacketId::Command))
        );
        assert_eq!(reducer.stats()[0].dropped, 1);

        // release the worker for both entries from a helper thread
        let releaser = std::thread::spawn(move || {
            gate.wait();
            gate.wait();
        });
        wait_for(|| reducer.stats()[0].handled == 2).await;
        releaser.join().unwrap();
    }

    #[tokio::test]
    async fn replacing_a_handler_routes_new_entries_to_it() {
        let reducer = PacketReducer::new();
        let first: Seen = Arc::default();
        let second: Seen = Arc::default();
        reducer.register(PacketId::CameraSync, recording_handler(first.clone()), config(1));
        reducer.register(PacketId::CameraSync, recording_handler(second.clone()), config(1));

        reducer
            .enqueue(client(1), PacketId::CameraSync, Bytes::from_static(&[1]))
            .unwrap();
        wait_for(|| second.lock().len() == 1).await;
        assert!(first.lock().is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let reducer = PacketReducer::new();
        let seen: Seen = Arc::default();
        reducer.register(PacketId::PlayerKeySync, recording_handler(seen.clone()), config(2));
        reducer
            .enqueue(client(1), PacketId::PlayerKeySync, Bytes::from_static(&[1]))
            .unwrap();
        wait_for(|| seen.lock().len() == 1).await;

        reducer.shutdown().await;
        assert!(!reducer.is_registered(PacketId::PlayerKeySync));
        assert_eq!(
            reducer.enqueue(client(1), PacketId::PlayerKeySync, Bytes::new()),
            Err(DispatchError::Unregistered(PacketId::PlayerKeySync))
        );
    }
}
