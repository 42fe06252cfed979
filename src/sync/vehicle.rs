//! Vehicle pure sync, driver-only commits and trailer chains

use std::sync::Arc;
use tracing::{debug, trace};

use super::{SyncContext, SyncError, SyncHandler};
use crate::client::Client;
use crate::packets::{ReturnSyncPacket, VehicleDamageSync, VehiclePureSyncPacket};
use crate::world::vehicle_models::{has_adjustable_property, has_doors, has_turret};
use crate::world::{ElementId, ElementType, WorldError, WorldEvent};

/// In-vehicle movement, including the tow chain behind the vehicle
pub struct VehiclePureSyncHandler {
    context: Arc<SyncContext>,
}

impl VehiclePureSyncHandler {
    pub fn new(context: Arc<SyncContext>) -> Self {
        Self { context }
    }

    fn commit_player(&self, player: ElementId, packet: &VehiclePureSyncPacket) -> Result<(), SyncError> {
        self.context.repository.update(player, |element| {
            let actual = element.element_type();
            let Some(state) = element.player_mut() else {
                return Err(WorldError::WrongType {
                    id: player,
                    expected: ElementType::Player,
                    actual,
                });
            };
            state.health = packet.player_health;
            state.armor = packet.player_armor;
            state.aim_origin = packet.aim_origin;
            state.aim_direction = packet.aim_direction;
            if let Some(slot) = packet.weapon_slot {
                state.weapon.slot = slot;
            }
            if let (Some(ammo), Some(in_clip)) = (packet.weapon_ammo, packet.weapon_ammo_in_clip) {
                state.weapon.ammo = ammo;
                state.weapon.ammo_in_clip = in_clip;
            }
            state.flags.is_in_water = packet.is_in_water;
            state.flags.wears_goggles = packet.wears_goggles;

            element.position = packet.position;
            element.velocity = packet.velocity;
            Ok(())
        })??;
        Ok(())
    }

    fn commit_vehicle(&self, vehicle: ElementId, packet: &VehiclePureSyncPacket) -> Result<(), SyncError> {
        self.context.repository.update(vehicle, |element| {
            let actual = element.element_type();
            let Some(state) = element.vehicle_mut() else {
                return Err(WorldError::WrongType {
                    id: vehicle,
                    expected: ElementType::Vehicle,
                    actual,
                });
            };
            state.health = packet.health;
            state.is_siren_active = packet.is_siren_active;
            if let Some(turret) = packet.turret_rotation.filter(|_| has_turret(state.model)) {
                state.turret_rotation = turret;
            }
            if let Some(property) = packet
                .adjustable_property
                .filter(|_| has_adjustable_property(state.model))
            {
                state.adjustable_property = property;
            }
            if let Some(ratios) = packet.door_open_ratios.filter(|_| has_doors(state.model)) {
                state.door_open_ratios = ratios;
            }

            element.position = packet.position;
            element.rotation = packet.rotation;
            element.velocity = packet.velocity;
            element.turn_velocity = packet.turn_velocity;
            Ok(())
        })??;
        self.context.repository.propagate_attachments(vehicle);
        Ok(())
    }

    /// Re-hitch the chain in packet order, each trailer behind the previous
    /// link. Stops at the first id that is not a live vehicle.
    fn sync_trailers(&self, vehicle: ElementId, packet: &VehiclePureSyncPacket) -> Result<(), SyncError> {
        let repository = &self.context.repository;

        if packet.trailers.is_empty() {
            if let Some(trailer) = repository.detach_towed(vehicle)? {
                debug!(vehicle = %vehicle, trailer = %trailer, "Trailer detached");
            }
            return Ok(());
        }

        let mut previous = vehicle;
        for link in &packet.trailers {
            if !repository.is_type(link.trailer, ElementType::Vehicle) {
                break;
            }
            match repository.attach_to_tower(link.trailer, Some(previous)) {
                Ok(_) => {}
                Err(WorldError::CyclicTow { trailer, tower }) => {
                    debug!(trailer = %trailer, tower = %tower, "Tow chain loops back, rest ignored");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            repository.update(link.trailer, |element| {
                element.position = link.position;
                element.rotation = link.rotation;
            })?;
            repository.propagate_attachments(link.trailer);
            previous = link.trailer;
        }
        Ok(())
    }
}

impl SyncHandler for VehiclePureSyncHandler {
    type Packet = VehiclePureSyncPacket;

    fn handle(&self, client: &Client, mut packet: VehiclePureSyncPacket) -> Result<(), SyncError> {
        let context = &self.context;
        let repository = &context.repository;
        let player = client.player();

        // the occupied vehicle is authoritative, not the id in the packet
        let vehicle = repository
            .with_element(player, |e| e.player().and_then(|p| p.vehicle()))
            .ok_or(WorldError::NotFound(player))?;

        context.send_to(
            &[client.endpoint()],
            &ReturnSyncPacket {
                position: packet.position,
                rotation: Some(packet.rotation),
            },
        );

        packet.player = player;
        packet.latency = client.wire_latency();
        packet.damage = vehicle
            .and_then(|vehicle| {
                repository
                    .with_element(vehicle, |e| e.vehicle().map(|v| VehicleDamageSync::from(&v.damage)))
                    .flatten()
            })
            .unwrap_or_default();
        context.send_to(&context.relay_targets(client), &packet);

        self.commit_player(player, &packet)?;
        if let Some(damage) = packet.player_damage {
            context.events.publish(WorldEvent::PlayerDamaged {
                player,
                damager: context.resolve(damage.damager),
                weapon: damage.weapon,
                body_part: damage.body_part,
            });
        }

        let Some(vehicle) = vehicle else {
            return Ok(());
        };
        let driver = repository
            .with_element(vehicle, |e| e.vehicle().and_then(|v| v.driver()))
            .flatten();
        if driver != Some(player) {
            trace!(player = %player, vehicle = %vehicle, "Passenger sync, vehicle state withheld");
            return Ok(());
        }

        self.commit_vehicle(vehicle, &packet)?;
        self.sync_trailers(vehicle, &packet)?;

        trace!(player = %player, vehicle = %vehicle, position = ?packet.position, "Vehicle pure sync");
        Ok(())
    }
}
