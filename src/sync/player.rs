//! Player pure sync: echo, relay and commit of on-foot movement

use std::sync::Arc;
use tracing::trace;

use super::{SyncContext, SyncError, SyncHandler};
use crate::client::Client;
use crate::packets::{PlayerPureSyncPacket, ReturnSyncPacket};
use crate::world::{ElementType, WorldError, WorldEvent};

/// On-foot movement
pub struct PlayerPureSyncHandler {
    context: Arc<SyncContext>,
}

impl PlayerPureSyncHandler {
    pub fn new(context: Arc<SyncContext>) -> Self {
        Self { context }
    }
}

impl SyncHandler for PlayerPureSyncHandler {
    type Packet = PlayerPureSyncPacket;

    fn handle(&self, client: &Client, mut packet: PlayerPureSyncPacket) -> Result<(), SyncError> {
        let context = &self.context;
        let player = client.player();

        context.send_to(
            &[client.endpoint()],
            &ReturnSyncPacket {
                position: packet.position,
                rotation: None,
            },
        );

        packet.player = player;
        packet.latency = 0;
        context.send_to(&context.relay_targets(client), &packet);

        let contact = context.resolve(packet.contact);
        context.repository.update(player, |element| {
            let actual = element.element_type();
            let Some(state) = element.player_mut() else {
                return Err(WorldError::WrongType {
                    id: player,
                    expected: ElementType::Player,
                    actual,
                });
            };
            state.health = packet.health;
            state.armor = packet.armor;
            state.weapon = packet.weapon;
            state.aim_origin = packet.aim_origin;
            state.aim_direction = packet.aim_direction;
            state.camera_position = packet.camera_position;
            state.camera_direction = packet.camera_direction;
            state.camera_rotation = packet.camera_rotation;
            state.flags = packet.flags;
            state.contact_element = contact;

            element.position = packet.position;
            element.rotation.z = packet.rotation;
            element.velocity = packet.velocity;
            Ok(())
        })??;
        context.repository.propagate_attachments(player);

        if let Some(damage) = packet.damage {
            context.events.publish(WorldEvent::PlayerDamaged {
                player,
                damager: context.resolve(damage.damager),
                weapon: damage.weapon,
                body_part: damage.body_part,
            });
        }

        trace!(player = %player, position = ?packet.position, "Player pure sync");
        Ok(())
    }
}
