//! In-vehicle pure sync

use super::codec::{DecodeError, PacketReader, PacketWriter};
use super::player::PlayerDamageInfo;
use super::{Packet, PacketId, Priority, Reliability};
use crate::world::element::{MAX_DOORS, MAX_LIGHTS, MAX_PANELS, MAX_WHEELS};
use crate::world::{ElementId, Vector2, Vector3, VehicleDamage};

/// One link of a tow chain, in order from the synced vehicle outwards
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailerSync {
    pub trailer: ElementId,
    pub position: Vector3,
    pub rotation: Vector3,
}

/// Damage arrays as relayed; empty arrays mean "unknown"
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VehicleDamageSync {
    pub doors: Vec<u8>,
    pub wheels: Vec<u8>,
    pub panels: Vec<u8>,
    pub lights: Vec<u8>,
}

impl From<&VehicleDamage> for VehicleDamageSync {
    fn from(damage: &VehicleDamage) -> Self {
        Self {
            doors: damage.doors.to_vec(),
            wheels: damage.wheels.to_vec(),
            panels: damage.panels.to_vec(),
            lights: damage.lights.to_vec(),
        }
    }
}

impl VehicleDamageSync {
    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            doors: read_array(reader, "doors", MAX_DOORS)?,
            wheels: read_array(reader, "wheels", MAX_WHEELS)?,
            panels: read_array(reader, "panels", MAX_PANELS)?,
            lights: read_array(reader, "lights", MAX_LIGHTS)?,
        })
    }

    fn encode(&self, writer: &mut PacketWriter) {
        for (array, max) in [
            (&self.doors, MAX_DOORS),
            (&self.wheels, MAX_WHEELS),
            (&self.panels, MAX_PANELS),
            (&self.lights, MAX_LIGHTS),
        ] {
            let len = array.len().min(max);
            writer.write_u8(len as u8);
            writer.write_bytes(&array[..len]);
        }
    }
}

fn read_array(
    reader: &mut PacketReader<'_>,
    field: &'static str,
    max: usize,
) -> Result<Vec<u8>, DecodeError> {
    let len = reader.read_u8()? as usize;
    if len > max {
        return Err(DecodeError::InvalidValue {
            field,
            value: len as u32,
        });
    }
    reader.read_bytes(len)
}

/// Movement and state of a player inside a vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct VehiclePureSyncPacket {
    /// Sender; stamped by the server before relaying
    pub player: ElementId,
    /// Sender's measured latency on relay
    pub latency: u16,
    pub vehicle: ElementId,
    /// 0 is the driver seat
    pub seat: u8,
    pub position: Vector3,
    pub rotation: Vector3,
    pub velocity: Vector3,
    pub turn_velocity: Vector3,
    pub health: f32,
    pub trailers: Vec<TrailerSync>,
    pub player_health: f32,
    pub player_armor: f32,
    pub aim_origin: Vector3,
    pub aim_direction: Vector3,
    pub weapon_slot: Option<u8>,
    pub weapon_ammo: Option<u16>,
    pub weapon_ammo_in_clip: Option<u16>,
    /// Only for turreted models
    pub turret_rotation: Option<Vector2>,
    /// Only for models with an adjustable property (crane arm, forklift...)
    pub adjustable_property: Option<u16>,
    pub is_in_water: bool,
    pub wears_goggles: bool,
    pub is_siren_active: bool,
    /// Only for models with doors
    pub door_open_ratios: Option<[f32; MAX_DOORS]>,
    /// Damage the player took while seated
    pub player_damage: Option<PlayerDamageInfo>,
    /// Overwritten from the server copy before relaying
    pub damage: VehicleDamageSync,
}

const FLAG_IN_WATER: u8 = 1 << 0;
const FLAG_GOGGLES: u8 = 1 << 1;
const FLAG_SIREN: u8 = 1 << 2;

impl Default for VehiclePureSyncPacket {
    fn default() -> Self {
        Self {
            player: ElementId::INVALID,
            latency: 0,
            vehicle: ElementId::INVALID,
            seat: 0,
            position: Vector3::ZERO,
            rotation: Vector3::ZERO,
            velocity: Vector3::ZERO,
            turn_velocity: Vector3::ZERO,
            health: 1000.0,
            trailers: Vec::new(),
            player_health: 100.0,
            player_armor: 0.0,
            aim_origin: Vector3::ZERO,
            aim_direction: Vector3::ZERO,
            weapon_slot: None,
            weapon_ammo: None,
            weapon_ammo_in_clip: None,
            turret_rotation: None,
            adjustable_property: None,
            is_in_water: false,
            wears_goggles: false,
            is_siren_active: false,
            door_open_ratios: None,
            player_damage: None,
            damage: VehicleDamageSync::default(),
        }
    }
}

impl Packet for VehiclePureSyncPacket {
    const ID: PacketId = PacketId::VehiclePureSync;
    const RELIABILITY: Reliability = Reliability::Sequenced;
    const PRIORITY: Priority = Priority::Medium;

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let player = reader.read_element_id()?;
        let latency = reader.read_u16()?;
        let vehicle = reader.read_element_id()?;
        let seat = reader.read_u8()?;
        let position = reader.read_vector3()?;
        let rotation = reader.read_vector3()?;
        let velocity = reader.read_vector3()?;
        let turn_velocity = reader.read_vector3()?;
        let health = reader.read_f32()?;

        let trailer_count = reader.read_u8()? as usize;
        let mut trailers = Vec::with_capacity(trailer_count);
        for _ in 0..trailer_count {
            trailers.push(TrailerSync {
                trailer: reader.read_element_id()?,
                position: reader.read_vector3()?,
                rotation: reader.read_vector3()?,
            });
        }

        let player_health = reader.read_f32()?;
        let player_armor = reader.read_f32()?;
        let aim_origin = reader.read_vector3()?;
        let aim_direction = reader.read_vector3()?;
        let weapon_slot = optional(reader, "weapon slot", PacketReader::read_u8)?;
        let weapon_ammo = optional(reader, "weapon ammo", PacketReader::read_u16)?;
        let weapon_ammo_in_clip = optional(reader, "weapon clip", PacketReader::read_u16)?;
        let turret_rotation = optional(reader, "turret", PacketReader::read_vector2)?;
        let adjustable_property = optional(reader, "adjustable property", PacketReader::read_u16)?;
        let flags = reader.read_u8()?;
        if flags & !(FLAG_IN_WATER | FLAG_GOGGLES | FLAG_SIREN) != 0 {
            return Err(DecodeError::InvalidValue {
                field: "vehicle flags",
                value: flags as u32,
            });
        }
        let door_open_ratios = optional(reader, "door ratios", |reader| {
            let mut ratios = [0.0; MAX_DOORS];
            for ratio in &mut ratios {
                *ratio = reader.read_f32()?;
            }
            Ok(ratios)
        })?;
        let player_damage = optional(reader, "player damage", |reader| {
            Ok(PlayerDamageInfo {
                damager: reader.read_optional_element_id()?,
                weapon: reader.read_u8()?,
                body_part: reader.read_u8()?,
            })
        })?;
        let damage = VehicleDamageSync::decode(reader)?;

        Ok(Self {
            player,
            latency,
            vehicle,
            seat,
            position,
            rotation,
            velocity,
            turn_velocity,
            health,
            trailers,
            player_health,
            player_armor,
            aim_origin,
            aim_direction,
            weapon_slot,
            weapon_ammo,
            weapon_ammo_in_clip,
            turret_rotation,
            adjustable_property,
            is_in_water: flags & FLAG_IN_WATER != 0,
            wears_goggles: flags & FLAG_GOGGLES != 0,
            is_siren_active: flags & FLAG_SIREN != 0,
            door_open_ratios,
            player_damage,
            damage,
        })
    }

    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_element_id(self.player);
        writer.write_u16(self.latency);
        writer.write_element_id(self.vehicle);
        writer.write_u8(self.seat);
        writer.write_vector3(self.position);
        writer.write_vector3(self.rotation);
        writer.write_vector3(self.velocity);
        writer.write_vector3(self.turn_velocity);
        writer.write_f32(self.health);

        let trailers = &self.trailers[..self.trailers.len().min(u8::MAX as usize)];
        writer.write_u8(trailers.len() as u8);
        for trailer in trailers {
            writer.write_element_id(trailer.trailer);
            writer.write_vector3(trailer.position);
            writer.write_vector3(trailer.rotation);
        }

        writer.write_f32(self.player_health);
        writer.write_f32(self.player_armor);
        writer.write_vector3(self.aim_origin);
        writer.write_vector3(self.aim_direction);
        write_optional(writer, self.weapon_slot, PacketWriter::write_u8);
        write_optional(writer, self.weapon_ammo, PacketWriter::write_u16);
        write_optional(writer, self.weapon_ammo_in_clip, PacketWriter::write_u16);
        write_optional(writer, self.turret_rotation, PacketWriter::write_vector2);
        write_optional(writer, self.adjustable_property, PacketWriter::write_u16);
        let mut flags = 0;
        if self.is_in_water {
            flags |= FLAG_IN_WATER;
        }
        if self.wears_goggles {
            flags |= FLAG_GOGGLES;
        }
        if self.is_siren_active {
            flags |= FLAG_SIREN;
        }
        writer.write_u8(flags);
        write_optional(writer, self.door_open_ratios, |writer, ratios| {
            for ratio in ratios {
                writer.write_f32(ratio);
            }
        });
        write_optional(writer, self.player_damage, |writer, damage| {
            writer.write_optional_element_id(damage.damager);
            writer.write_u8(damage.weapon);
            writer.write_u8(damage.body_part);
        });
        self.damage.encode(writer);
    }
}

fn optional<'a, T>(
    reader: &mut PacketReader<'a>,
    field: &'static str,
    read: impl FnOnce(&mut PacketReader<'a>) -> Result<T, DecodeError>,
) -> Result<Option<T>, DecodeError> {
    if reader.read_bool(field)? {
        read(reader).map(Some)
    } else {
        Ok(None)
    }
}

fn write_optional<T>(
    writer: &mut PacketWriter,
    value: Option<T>,
    write: impl FnOnce(&mut PacketWriter, T),
) {
    writer.write_bool(value.is_some());
    if let Some(value) = value {
        write(writer, value);
    }
}
