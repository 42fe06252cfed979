//! Connected clients and their player elements

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::net::EndpointId;
use crate::util::rate_limit::PacketRateLimiter;
use crate::world::ElementId;

/// A remote endpoint and the player element it controls
pub struct Client {
    endpoint: EndpointId,
    player: ElementId,
    connected: AtomicBool,
    /// Milliseconds, as last reported by the transport
    latency: AtomicU32,
    limiter: PacketRateLimiter,
}

impl Client {
    pub fn new(endpoint: EndpointId, player: ElementId, limiter: PacketRateLimiter) -> Self {
        Self {
            endpoint,
            player,
            connected: AtomicBool::new(true),
            latency: AtomicU32::new(0),
            limiter,
        }
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn player(&self) -> ElementId {
        self.player
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn latency(&self) -> u32 {
        self.latency.load(Ordering::Relaxed)
    }

    pub fn set_latency(&self, latency: u32) {
        self.latency.store(latency, Ordering::Relaxed);
    }

    /// Latency as carried in relayed packets
    pub fn wire_latency(&self) -> u16 {
        self.latency().min(u16::MAX as u32) as u16
    }

    /// Flip to disconnected; true only for the call that did the flip
    pub(crate) fn mark_disconnected(&self) -> bool {
        self.connected.swap(false, Ordering::AcqRel)
    }

    /// Whether another inbound packet fits in the client's rate budget
    pub fn allow_packet(&self) -> bool {
        self.limiter.check()
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<EndpointId, Arc<Client>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, endpoint: EndpointId) -> Option<Arc<Client>> {
        self.clients.get(&endpoint).map(|c| c.value().clone())
    }

    /// Existing client for `endpoint`, or the one built by `create`.
    /// `create` runs at most once per endpoint even under concurrent calls.
    pub fn get_or_try_insert<E>(
        &self,
        endpoint: EndpointId,
        create: impl FnOnce() -> Result<Client, E>,
    ) -> Result<(Arc<Client>, bool), E> {
        match self.clients.entry(endpoint) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Ok((entry.get().clone(), false)),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let client = Arc::new(create()?);
                entry.insert(client.clone());
                Ok((client, true))
            }
        }
    }

    pub fn remove(&self, endpoint: EndpointId) -> Option<Arc<Client>> {
        self.clients.remove(&endpoint).map(|(_, client)| client)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.clients.iter().filter(|c| c.is_connected()).count()
    }

    /// Connected endpoints other than `sender`, sorted
    pub fn connected_except(&self, sender: EndpointId) -> Vec<EndpointId> {
        let mut endpoints: Vec<EndpointId> = self
            .clients
            .iter()
            .filter(|c| c.endpoint() != sender && c.is_connected())
            .map(|c| c.endpoint())
            .collect();
        endpoints.sort();
        endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: u64) -> Client {
        Client::new(EndpointId(endpoint), ElementId(endpoint as u32 + 100), PacketRateLimiter::default())
    }

    #[test]
    fn disconnect_flips_once() {
        let client = client(1);
        assert!(client.mark_disconnected());
        assert!(!client.mark_disconnected());
        assert!(!client.is_connected());
    }

    #[test]
    fn relay_set_excludes_sender_and_disconnected() {
        let registry = ClientRegistry::new();
        for endpoint in 1..=4 {
            registry
                .get_or_try_insert::<()>(EndpointId(endpoint), || Ok(client(endpoint)))
                .unwrap();
        }
        registry.get(EndpointId(3)).unwrap().mark_disconnected();

        assert_eq!(
            registry.connected_except(EndpointId(1)),
            vec![EndpointId(2), EndpointId(4)]
        );
        assert_eq!(registry.connected_count(), 3);
    }

    #[test]
    fn existing_client_is_reused() {
        let registry = ClientRegistry::new();
        let (first, created) = registry
            .get_or_try_insert::<()>(EndpointId(7), || Ok(client(7)))
            .unwrap();
        assert!(created);

        let (second, created) = registry
            .get_or_try_insert::<()>(EndpointId(7), || panic!("created twice"))
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn wire_latency_saturates() {
        let client = client(1);
        client.set_latency(100_000);
        assert_eq!(client.wire_latency(), u16::MAX);
    }
}
