//! Server assembly
//!
//! [`Server`] owns every shared component and is the single entry point for
//! inbound traffic. It creates clients lazily, handles connection lifecycle
//! packets inline and hands everything else to the packet reducer.

use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{Client, ClientRegistry};
use crate::colshape::ColShapeEngine;
use crate::config::Config;
use crate::dispatch::{DispatchError, PacketHandler, PacketReducer, QueueStats};
use crate::net::udp::PacketSink;
use crate::net::{EndpointId, Transport};
use crate::packets::PacketId;
use crate::sync::{
    CameraSyncHandler, CommandHandler, Decoded, KeySyncHandler, PlayerPureSyncHandler, SyncContext,
    VehiclePureSyncHandler,
};
use crate::util::rate_limit::PacketRateLimiter;
use crate::util::time::uptime_secs;
use crate::world::{
    Element, ElementKind, ElementRepository, ElementType, EventBus, PlayerState, QuitReason,
    WorldError, WorldEvent,
};

#[derive(Default)]
struct PacketCounters {
    unknown: AtomicU64,
    rate_limited: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot served by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub uptime_secs: u64,
    pub clients: usize,
    pub elements: usize,
    pub elements_by_type: BTreeMap<ElementType, usize>,
    pub colshapes: usize,
    pub queues: Vec<QueueStats>,
    pub unknown_packets: u64,
    pub rate_limited_packets: u64,
    pub rejected_packets: u64,
}

pub struct Server {
    config: Config,
    repository: Arc<ElementRepository>,
    clients: Arc<ClientRegistry>,
    transport: Arc<dyn Transport>,
    events: EventBus,
    reducer: PacketReducer,
    colshapes: Arc<ColShapeEngine>,
    counters: PacketCounters,
}

impl Server {
    /// Build every component and start the packet queues.
    /// Must be called inside a tokio runtime.
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let repository = Arc::new(ElementRepository::with_cell_size(config.spatial_cell_size));
        let clients = Arc::new(ClientRegistry::new());
        let events = EventBus::default();
        let colshapes = Arc::new(ColShapeEngine::new(repository.clone(), events.clone()));

        let context = Arc::new(SyncContext {
            repository: repository.clone(),
            clients: clients.clone(),
            transport: transport.clone(),
            events: events.clone(),
        });

        let reducer = PacketReducer::new();
        let sync = config.sync_queue();
        let handlers: [(PacketId, Arc<dyn PacketHandler>); 4] = [
            (
                PacketId::PlayerPureSync,
                Arc::new(Decoded(PlayerPureSyncHandler::new(context.clone()))),
            ),
            (
                PacketId::VehiclePureSync,
                Arc::new(Decoded(VehiclePureSyncHandler::new(context.clone()))),
            ),
            (
                PacketId::PlayerKeySync,
                Arc::new(Decoded(KeySyncHandler::new(context.clone()))),
            ),
            (
                PacketId::CameraSync,
                Arc::new(Decoded(CameraSyncHandler::new(context.clone()))),
            ),
        ];
        for (packet_id, handler) in handlers {
            reducer.register(packet_id, handler, sync);
        }
        reducer.register(
            PacketId::Command,
            Arc::new(Decoded(CommandHandler::new(context))),
            config.command_queue(),
        );

        info!(
            sync_workers = config.sync_worker_count,
            command_workers = config.command_worker_count,
            "Sync server ready"
        );

        Self {
            config: config.clone(),
            repository,
            clients,
            transport,
            events,
            reducer,
            colshapes,
            counters: PacketCounters::default(),
        }
    }

    pub fn repository(&self) -> &Arc<ElementRepository> {
        &self.repository
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn colshapes(&self) -> &Arc<ColShapeEngine> {
        &self.colshapes
    }

    /// Handler registrations can be replaced at runtime
    pub fn reducer(&self) -> &PacketReducer {
        &self.reducer
    }

    /// Entry point for every inbound packet
    pub fn on_packet(&self, endpoint: EndpointId, packet_id: u8, payload: Bytes, latency: Option<u32>) {
        let packet_id = match PacketId::try_from(packet_id) {
            Ok(packet_id) => packet_id,
            Err(raw) => {
                self.counters.unknown.fetch_add(1, Ordering::Relaxed);
                debug!(client = %endpoint, packet_id = raw, "Unknown packet dropped");
                return;
            }
        };

        if packet_id.is_lifecycle() {
            let reason = match packet_id {
                PacketId::PlayerQuit => QuitReason::Quit,
                _ => QuitReason::Timeout,
            };
            self.disconnect(endpoint, reason);
            return;
        }

        if !self.reducer.is_registered(packet_id) {
            self.counters.unknown.fetch_add(1, Ordering::Relaxed);
            debug!(client = %endpoint, packet = %packet_id, "No handler, packet dropped");
            return;
        }

        let client = match self.client_for(endpoint) {
            Ok(client) => client,
            Err(e) => {
                warn!(client = %endpoint, error = %e, "Could not create player");
                return;
            }
        };
        if let Some(latency) = latency {
            client.set_latency(latency);
        }
        if !client.allow_packet() {
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            warn!(client = %endpoint, packet = %packet_id, "Rate limit exceeded, packet dropped");
            return;
        }

        match self.reducer.enqueue(client, packet_id, payload) {
            Ok(_) => {}
            Err(DispatchError::Unregistered(_)) => {
                self.counters.unknown.fetch_add(1, Ordering::Relaxed);
                debug!(client = %endpoint, packet = %packet_id, "No handler, packet dropped");
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(client = %endpoint, error = %e, "Packet dropped");
            }
        }
    }

    /// Client of `endpoint`, creating it and its player on first contact
    fn client_for(&self, endpoint: EndpointId) -> Result<Arc<Client>, WorldError> {
        let (client, created) = self.clients.get_or_try_insert(endpoint, || {
            let player = self
                .repository
                .insert(Element::new(ElementKind::Player(PlayerState::new(endpoint))))?;
            Ok::<_, WorldError>(Client::new(
                endpoint,
                player,
                PacketRateLimiter::new(self.config.inbound_packet_rate),
            ))
        })?;

        if created {
            info!(client = %endpoint, player = %client.player(), "Client connected");
            self.events.publish(WorldEvent::ClientConnected {
                endpoint,
                player: client.player(),
            });
        }
        Ok(client)
    }

    /// Detach a client and remove its player. Only the first call for a
    /// connection does anything; returns whether this call did.
    pub fn disconnect(&self, endpoint: EndpointId, reason: QuitReason) -> bool {
        let Some(client) = self.clients.get(endpoint) else {
            return false;
        };
        if !client.mark_disconnected() {
            return false;
        }
        self.clients.remove(endpoint);

        let player = client.player();
        // removal also clears the driver seat and tow or attachment links
        if let Err(e) = self.repository.remove(player) {
            warn!(client = %endpoint, player = %player, error = %e, "Player already gone");
        }
        self.transport.disconnect(endpoint);

        info!(client = %endpoint, player = %player, reason = ?reason, "Client disconnected");
        self.events.publish(WorldEvent::ClientDisconnected {
            endpoint,
            player,
            reason,
        });
        true
    }

    /// Start the periodic collision pass
    pub fn spawn_collision_pass(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(
            self.colshapes
                .clone()
                .run(self.config.collision_interval(), shutdown),
        )
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            uptime_secs: uptime_secs(),
            clients: self.clients.connected_count(),
            elements: self.repository.len(),
            elements_by_type: self.repository.count_by_type(),
            colshapes: self.colshapes.shape_count(),
            queues: self.reducer.stats(),
            unknown_packets: self.counters.unknown.load(Ordering::Relaxed),
            rate_limited_packets: self.counters.rate_limited.load(Ordering::Relaxed),
            rejected_packets: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stop the packet queues, letting in-flight handlers finish
    pub async fn shutdown(&self) {
        self.reducer.shutdown().await;
    }
}

impl PacketSink for Server {
    fn on_packet(&self, endpoint: EndpointId, packet_id: u8, payload: Bytes, latency: Option<u32>) {
        Server::on_packet(self, endpoint, packet_id, payload, latency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MemoryTransport;

    fn server() -> (Server, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        (Server::new(&Config::default(), transport.clone()), transport)
    }

    #[tokio::test]
    async fn first_packet_creates_a_player_once() {
        let (server, _) = server();
        let mut events = server.events().subscribe();

        for _ in 0..3 {
            server.on_packet(EndpointId(5), PacketId::PlayerKeySync as u8, Bytes::new(), Some(40));
        }

        let client = server.clients().get(EndpointId(5)).unwrap();
        assert_eq!(client.latency(), 40);
        assert!(server.repository().is_type(client.player(), ElementType::Player));
        assert_eq!(server.repository().ids_by_type(ElementType::Player).len(), 1);
        assert_eq!(
            events.try_recv().unwrap(),
            WorldEvent::ClientConnected {
                endpoint: EndpointId(5),
                player: client.player(),
            }
        );
        assert!(events.try_recv().is_err());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_packets_create_nothing() {
        let (server, _) = server();
        server.on_packet(EndpointId(5), 0xEE, Bytes::new(), None);
        // server-to-client only
        server.on_packet(EndpointId(6), PacketId::ReturnSync as u8, Bytes::new(), None);

        assert!(server.clients().is_empty());
        assert_eq!(server.repository().ids_by_type(ElementType::Player).len(), 0);
        let stats = server.stats();
        assert_eq!(stats.unknown_packets, 2);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn lifecycle_packets_disconnect_once() {
        let (server, transport) = server();
        let mut events = server.events().subscribe();
        server.on_packet(EndpointId(5), PacketId::CameraSync as u8, Bytes::new(), None);
        let player = server.clients().get(EndpointId(5)).unwrap().player();
        let _ = events.try_recv();

        server.on_packet(EndpointId(5), PacketId::PlayerNoSocket as u8, Bytes::new(), None);
        server.on_packet(EndpointId(5), PacketId::PlayerQuit as u8, Bytes::new(), None);

        assert!(!server.repository().contains(player));
        assert!(server.clients().is_empty());
        assert_eq!(transport.disconnected(), vec![EndpointId(5)]);
        assert_eq!(
            events.try_recv().unwrap(),
            WorldEvent::ClientDisconnected {
                endpoint: EndpointId(5),
                player,
                reason: QuitReason::Timeout,
            }
        );
        assert!(events.try_recv().is_err());
        assert!(!server.disconnect(EndpointId(5), QuitReason::Quit));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn flooding_client_is_rate_limited() {
        let transport = Arc::new(MemoryTransport::new());
        let config = Config {
            inbound_packet_rate: 3,
            ..Config::default()
        };
        let server = Server::new(&config, transport);

        for _ in 0..10 {
            server.on_packet(EndpointId(1), PacketId::PlayerKeySync as u8, Bytes::new(), None);
        }
        assert_eq!(server.stats().rate_limited_packets, 7);
        server.shutdown().await;
    }
}
