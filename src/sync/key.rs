//! Key sync relay

use std::sync::Arc;

use super::{SyncContext, SyncError, SyncHandler};
use crate::client::Client;
use crate::packets::KeySyncPacket;

/// Controller state is relayed and never stored
pub struct KeySyncHandler {
    context: Arc<SyncContext>,
}

impl KeySyncHandler {
    pub fn new(context: Arc<SyncContext>) -> Self {
        Self { context }
    }
}

impl SyncHandler for KeySyncHandler {
    type Packet = KeySyncPacket;

    fn handle(&self, client: &Client, mut packet: KeySyncPacket) -> Result<(), SyncError> {
        packet.player = client.player();
        self.context.send_to(&self.context.relay_targets(client), &packet);
        Ok(())
    }
}
