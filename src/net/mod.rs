//! Transport seam
//!
//! The sync core only ever sees opaque endpoint handles and hands finished
//! payloads to a [`Transport`]. The datagram adapter in [`udp`] is the one the
//! binary runs; [`MemoryTransport`] records traffic for tests and tooling.

pub mod udp;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::packets::{Packet, PacketId, Priority, Reliability};

/// Opaque handle of a remote client, assigned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait Transport: Send + Sync {
    /// Queue `payload` for every endpoint in `destinations`. Must not block.
    fn send(
        &self,
        destinations: &[EndpointId],
        packet_id: PacketId,
        reliability: Reliability,
        priority: Priority,
        payload: Bytes,
    );

    /// Drop transport-side state of an endpoint after it left
    fn disconnect(&self, _endpoint: EndpointId) {}
}

/// Encode `packet` once and send it with its own reliability and priority
pub fn send_packet<P: Packet>(transport: &dyn Transport, destinations: &[EndpointId], packet: &P) {
    if destinations.is_empty() {
        return;
    }
    transport.send(destinations, P::ID, P::RELIABILITY, P::PRIORITY, packet.write());
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundPacket {
    pub destinations: Vec<EndpointId>,
    pub packet_id: PacketId,
    pub reliability: Reliability,
    pub priority: Priority,
    pub payload: Bytes,
}

impl OutboundPacket {
    /// Decode the payload as `P`
    pub fn decode<P: Packet>(&self) -> Option<P> {
        (self.packet_id == P::ID)
            .then(|| P::read(&self.payload).ok())
            .flatten()
    }
}

/// Records everything sent through it
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<OutboundPacket>>,
    disconnected: Mutex<Vec<EndpointId>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundPacket> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<OutboundPacket> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Packets of one type that reached `endpoint`
    pub fn sent_to(&self, endpoint: EndpointId, packet_id: PacketId) -> Vec<OutboundPacket> {
        self.sent
            .lock()
            .iter()
            .filter(|p| p.packet_id == packet_id && p.destinations.contains(&endpoint))
            .cloned()
            .collect()
    }

    pub fn disconnected(&self) -> Vec<EndpointId> {
        self.disconnected.lock().clone()
    }
}

impl Transport for MemoryTransport {
    fn send(
        &self,
        destinations: &[EndpointId],
        packet_id: PacketId,
        reliability: Reliability,
        priority: Priority,
        payload: Bytes,
    ) {
        self.sent.lock().push(OutboundPacket {
            destinations: destinations.to_vec(),
            packet_id,
            reliability,
            priority,
            payload,
        });
    }

    fn disconnect(&self, endpoint: EndpointId) {
        self.disconnected.lock().push(endpoint);
    }
}
