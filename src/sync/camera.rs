//! Camera mode updates for the sending player

use std::sync::Arc;
use tracing::trace;

use super::{SyncContext, SyncError, SyncHandler};
use crate::client::Client;
use crate::packets::{CameraSyncPacket, CameraSyncTarget};
use crate::world::{CameraState, ElementType, WorldError};

/// Stores what the player's camera shows; nothing is relayed
pub struct CameraSyncHandler {
    context: Arc<SyncContext>,
}

impl CameraSyncHandler {
    pub fn new(context: Arc<SyncContext>) -> Self {
        Self { context }
    }
}

impl SyncHandler for CameraSyncHandler {
    type Packet = CameraSyncPacket;

    fn handle(&self, client: &Client, packet: CameraSyncPacket) -> Result<(), SyncError> {
        let player = client.player();
        let camera = match packet.target {
            CameraSyncTarget::Fixed { position, look_at } => CameraState::Fixed { position, look_at },
            CameraSyncTarget::Element(target) => CameraState::Target(self.context.resolve(target)),
        };

        self.context.repository.update(player, |element| {
            let actual = element.element_type();
            match element.player_mut() {
                Some(state) => {
                    state.camera = camera;
                    Ok(())
                }
                None => Err(WorldError::WrongType {
                    id: player,
                    expected: ElementType::Player,
                    actual,
                }),
            }
        })??;

        trace!(player = %player, camera = ?camera, "Camera sync");
        Ok(())
    }
}
