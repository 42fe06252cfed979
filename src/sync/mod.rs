//! Entity synchronization
//!
//! One handler per synchronized packet type. Every handler follows the same
//! shape: decode, optionally echo to the sender, relay to everyone else, then
//! commit the accepted state to the repository.

mod camera;
mod command;
mod key;
mod player;
mod vehicle;

pub use camera::CameraSyncHandler;
pub use command::CommandHandler;
pub use key::KeySyncHandler;
pub use player::PlayerPureSyncHandler;
pub use vehicle::VehiclePureSyncHandler;

use anyhow::Context;
use std::sync::Arc;

use crate::client::{Client, ClientRegistry};
use crate::dispatch::{PacketHandler, PacketQueueEntry};
use crate::net::{send_packet, EndpointId, Transport};
use crate::packets::{DecodeError, Packet};
use crate::world::{ElementId, ElementRepository, EventBus, WorldError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Malformed packet: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    World(#[from] WorldError),
}

/// Everything a sync handler reads from or writes to
pub struct SyncContext {
    pub repository: Arc<ElementRepository>,
    pub clients: Arc<ClientRegistry>,
    pub transport: Arc<dyn Transport>,
    pub events: EventBus,
}

impl SyncContext {
    /// Connected clients other than `sender`
    pub fn relay_targets(&self, sender: &Client) -> Vec<EndpointId> {
        self.clients.connected_except(sender.endpoint())
    }

    pub fn send_to<P: Packet>(&self, destinations: &[EndpointId], packet: &P) {
        send_packet(self.transport.as_ref(), destinations, packet);
    }

    /// Keep a weak reference only if it still names a live element
    pub fn resolve(&self, id: Option<ElementId>) -> Option<ElementId> {
        id.filter(|id| id.is_valid() && self.repository.contains(*id))
    }
}

/// Typed handler for one synchronized packet
pub trait SyncHandler: Send + Sync {
    type Packet: Packet;

    fn handle(&self, client: &Client, packet: Self::Packet) -> Result<(), SyncError>;
}

/// Decodes the payload and feeds it to a [`SyncHandler`]
pub struct Decoded<H>(pub H);

impl<H: SyncHandler> PacketHandler for Decoded<H> {
    fn handle(&self, entry: &PacketQueueEntry) -> anyhow::Result<()> {
        // packets still queued when the client left
        if !entry.client.is_connected() {
            return Ok(());
        }

        let packet = H::Packet::read(&entry.payload)
            .map_err(SyncError::from)
            .with_context(|| format!("decoding {}", entry.packet_id))?;
        self.0
            .handle(&entry.client, packet)
            .with_context(|| format!("handling {} for player {}", entry.packet_id, entry.client.player()))
    }
}
