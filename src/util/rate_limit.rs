//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Default inbound packets per second per client; sync runs at roughly 10-30 Hz
/// per packet type
pub const INBOUND_PACKET_RATE: u32 = 120;

/// Per-client inbound packet limiter
#[derive(Clone)]
pub struct PacketRateLimiter {
    inbound: Arc<Limiter>,
}

impl PacketRateLimiter {
    pub fn new(packets_per_second: u32) -> Self {
        Self {
            inbound: create_limiter(packets_per_second),
        }
    }

    /// Check if a packet is allowed (returns true if allowed)
    pub fn check(&self) -> bool {
        self.inbound.check().is_ok()
    }
}

impl Default for PacketRateLimiter {
    fn default() -> Self {
        Self::new(INBOUND_PACKET_RATE)
    }
}
