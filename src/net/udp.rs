//! Raw datagram adapter
//!
//! Datagram layout: one packet-id byte followed by the payload. Each remote
//! socket address gets its own endpoint id on first contact. Reliability and
//! priority are accepted but delivery is best-effort.

use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{EndpointId, Transport};
use crate::packets::{PacketId, Priority, Reliability};

const MAX_DATAGRAM: usize = 2048;

/// Receiver of decoded datagrams
pub trait PacketSink: Send + Sync {
    fn on_packet(&self, endpoint: EndpointId, packet_id: u8, payload: Bytes, latency: Option<u32>);
}

pub struct UdpTransport {
    socket: UdpSocket,
    endpoints: DashMap<SocketAddr, EndpointId>,
    addresses: DashMap<EndpointId, SocketAddr>,
    next_endpoint: AtomicU64,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            endpoints: DashMap::new(),
            addresses: DashMap::new(),
            next_endpoint: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn endpoint_count(&self) -> usize {
        self.addresses.len()
    }

    fn endpoint_for(&self, addr: SocketAddr) -> EndpointId {
        *self.endpoints.entry(addr).or_insert_with(|| {
            let endpoint = EndpointId(self.next_endpoint.fetch_add(1, Ordering::Relaxed));
            self.addresses.insert(endpoint, addr);
            debug!(endpoint = %endpoint, addr = %addr, "New endpoint");
            endpoint
        })
    }

    /// Receive loop; runs until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, sink: Arc<dyn PacketSink>, mut shutdown: watch::Receiver<bool>) {
        match self.local_addr() {
            Ok(addr) => info!(addr = %addr, "UDP transport listening"),
            Err(e) => warn!(error = %e, "UDP transport listening on unknown address"),
        }

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((0, _)) => {}
                        Ok((len, addr)) => {
                            let endpoint = self.endpoint_for(addr);
                            let payload = Bytes::copy_from_slice(&buf[1..len]);
                            sink.on_packet(endpoint, buf[0], payload, None);
                        }
                        Err(e) => {
                            // ICMP unreachable and friends surface here on some platforms
                            debug!(error = %e, "UDP receive failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("UDP transport stopped");
    }
}

impl Transport for UdpTransport {
    fn send(
        &self,
        destinations: &[EndpointId],
        packet_id: PacketId,
        _reliability: Reliability,
        _priority: Priority,
        payload: Bytes,
    ) {
        let mut datagram = BytesMut::with_capacity(payload.len() + 1);
        datagram.put_u8(packet_id as u8);
        datagram.put_slice(&payload);

        for endpoint in destinations {
            let Some(addr) = self.addresses.get(endpoint).map(|a| *a.value()) else {
                debug!(endpoint = %endpoint, packet = %packet_id, "Send to unknown endpoint dropped");
                continue;
            };
            if let Err(e) = self.socket.try_send_to(&datagram, addr) {
                warn!(endpoint = %endpoint, packet = %packet_id, error = %e, "Datagram dropped");
            }
        }
    }

    fn disconnect(&self, endpoint: EndpointId) {
        if let Some((_, addr)) = self.addresses.remove(&endpoint) {
            self.endpoints.remove(&addr);
        }
    }
}
