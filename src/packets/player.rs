//! On-foot player packets: pure sync, key sync, camera sync and the echo

use super::codec::{DecodeError, PacketReader, PacketWriter};
use super::{Packet, PacketId, Priority, Reliability};
use crate::world::{ElementId, PlayerFlags, PlayerWeapon, Vector3};

const FLAG_BITS: u16 = (1 << 11) - 1;

fn flags_to_bits(flags: &PlayerFlags) -> u16 {
    [
        flags.is_in_water,
        flags.is_on_ground,
        flags.has_jetpack,
        flags.is_ducked,
        flags.wears_goggles,
        flags.has_contact,
        flags.is_choking,
        flags.akimbo_target_up,
        flags.is_on_fire,
        flags.is_syncing_velocity,
        flags.is_stealth_aiming,
    ]
    .iter()
    .enumerate()
    .fold(0, |bits, (bit, set)| bits | ((*set as u16) << bit))
}

fn flags_from_bits(bits: u16) -> Result<PlayerFlags, DecodeError> {
    if bits & !FLAG_BITS != 0 {
        return Err(DecodeError::InvalidValue {
            field: "player flags",
            value: bits as u32,
        });
    }
    let bit = |n: u16| bits & (1 << n) != 0;
    Ok(PlayerFlags {
        is_in_water: bit(0),
        is_on_ground: bit(1),
        has_jetpack: bit(2),
        is_ducked: bit(3),
        wears_goggles: bit(4),
        has_contact: bit(5),
        is_choking: bit(6),
        akimbo_target_up: bit(7),
        is_on_fire: bit(8),
        is_syncing_velocity: bit(9),
        is_stealth_aiming: bit(10),
    })
}

pub(super) fn read_weapon(reader: &mut PacketReader<'_>) -> Result<PlayerWeapon, DecodeError> {
    Ok(PlayerWeapon {
        slot: reader.read_u8()?,
        weapon_type: reader.read_u8()?,
        ammo: reader.read_u16()?,
        ammo_in_clip: reader.read_u16()?,
    })
}

pub(super) fn write_weapon(writer: &mut PacketWriter, weapon: &PlayerWeapon) {
    writer.write_u8(weapon.slot);
    writer.write_u8(weapon.weapon_type);
    writer.write_u16(weapon.ammo);
    writer.write_u16(weapon.ammo_in_clip);
}

/// Damage report attached to a pure sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerDamageInfo {
    /// `None` when the damage had no attributable source
    pub damager: Option<ElementId>,
    pub weapon: u8,
    pub body_part: u8,
}

/// On-foot movement and state
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerPureSyncPacket {
    /// Sender; stamped by the server before relaying
    pub player: ElementId,
    /// Zero on relay
    pub latency: u16,
    pub flags: PlayerFlags,
    pub position: Vector3,
    /// Heading in degrees
    pub rotation: f32,
    pub velocity: Vector3,
    pub health: f32,
    pub armor: f32,
    /// Element the player is standing on
    pub contact: Option<ElementId>,
    pub weapon: PlayerWeapon,
    pub aim_origin: Vector3,
    pub aim_direction: Vector3,
    pub camera_position: Vector3,
    pub camera_direction: Vector3,
    pub camera_rotation: f32,
    /// Present when the player's health changed from damage
    pub damage: Option<PlayerDamageInfo>,
}

impl Default for PlayerPureSyncPacket {
    fn default() -> Self {
        Self {
            player: ElementId::INVALID,
            latency: 0,
            flags: PlayerFlags::default(),
            position: Vector3::ZERO,
            rotation: 0.0,
            velocity: Vector3::ZERO,
            health: 100.0,
            armor: 0.0,
            contact: None,
            weapon: PlayerWeapon::default(),
            aim_origin: Vector3::ZERO,
            aim_direction: Vector3::ZERO,
            camera_position: Vector3::ZERO,
            camera_direction: Vector3::ZERO,
            camera_rotation: 0.0,
            damage: None,
        }
    }
}

impl Packet for PlayerPureSyncPacket {
    const ID: PacketId = PacketId::PlayerPureSync;
    const RELIABILITY: Reliability = Reliability::Sequenced;
    const PRIORITY: Priority = Priority::Medium;

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let player = reader.read_element_id()?;
        let latency = reader.read_u16()?;
        let flags = flags_from_bits(reader.read_u16()?)?;
        let position = reader.read_vector3()?;
        let rotation = reader.read_f32()?;
        let velocity = reader.read_vector3()?;
        let health = reader.read_f32()?;
        let armor = reader.read_f32()?;
        let contact = reader.read_optional_element_id()?;
        let weapon = read_weapon(reader)?;
        let aim_origin = reader.read_vector3()?;
        let aim_direction = reader.read_vector3()?;
        let camera_position = reader.read_vector3()?;
        let camera_direction = reader.read_vector3()?;
        let camera_rotation = reader.read_f32()?;
        let damage = if reader.read_bool("damage changed")? {
            Some(PlayerDamageInfo {
                damager: reader.read_optional_element_id()?,
                weapon: reader.read_u8()?,
                body_part: reader.read_u8()?,
            })
        } else {
            None
        };

        Ok(Self {
            player,
            latency,
            flags,
            position,
            rotation,
            velocity,
            health,
            armor,
            contact,
            weapon,
            aim_origin,
            aim_direction,
            camera_position,
            camera_direction,
            camera_rotation,
            damage,
        })
    }

    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_element_id(self.player);
        writer.write_u16(self.latency);
        writer.write_u16(flags_to_bits(&self.flags));
        writer.write_vector3(self.position);
        writer.write_f32(self.rotation);
        writer.write_vector3(self.velocity);
        writer.write_f32(self.health);
        writer.write_f32(self.armor);
        writer.write_optional_element_id(self.contact);
        write_weapon(writer, &self.weapon);
        writer.write_vector3(self.aim_origin);
        writer.write_vector3(self.aim_direction);
        writer.write_vector3(self.camera_position);
        writer.write_vector3(self.camera_direction);
        writer.write_f32(self.camera_rotation);
        writer.write_bool(self.damage.is_some());
        if let Some(damage) = &self.damage {
            writer.write_optional_element_id(damage.damager);
            writer.write_u8(damage.weapon);
            writer.write_u8(damage.body_part);
        }
    }
}

/// Controller state; relayed as-is apart from the sender stamp
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeySyncPacket {
    pub player: ElementId,
    /// One bit per control
    pub keys: u32,
    pub left_stick_x: i16,
    pub left_stick_y: i16,
    /// Aim origin and direction while aiming
    pub aim: Option<(Vector3, Vector3)>,
}

impl Packet for KeySyncPacket {
    const ID: PacketId = PacketId::PlayerKeySync;
    const RELIABILITY: Reliability = Reliability::Sequenced;
    const PRIORITY: Priority = Priority::Medium;

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let player = reader.read_element_id()?;
        let keys = reader.read_u32()?;
        let left_stick_x = reader.read_i16()?;
        let left_stick_y = reader.read_i16()?;
        let aim = if reader.read_bool("aiming")? {
            Some((reader.read_vector3()?, reader.read_vector3()?))
        } else {
            None
        };
        Ok(Self {
            player,
            keys,
            left_stick_x,
            left_stick_y,
            aim,
        })
    }

    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_element_id(self.player);
        writer.write_u32(self.keys);
        writer.write_i16(self.left_stick_x);
        writer.write_i16(self.left_stick_y);
        writer.write_bool(self.aim.is_some());
        if let Some((origin, direction)) = self.aim {
            writer.write_vector3(origin);
            writer.write_vector3(direction);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraSyncTarget {
    Fixed { position: Vector3, look_at: Vector3 },
    /// Following an element; `None` for "nothing"
    Element(Option<ElementId>),
}

/// Client report of what its camera is doing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSyncPacket {
    /// Client-side counter, lets stale reports be told apart
    pub time_context: u8,
    pub target: CameraSyncTarget,
}

impl Packet for CameraSyncPacket {
    const ID: PacketId = PacketId::CameraSync;
    const RELIABILITY: Reliability = Reliability::Reliable;
    const PRIORITY: Priority = Priority::Low;

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let time_context = reader.read_u8()?;
        let target = match reader.read_u8()? {
            0 => CameraSyncTarget::Fixed {
                position: reader.read_vector3()?,
                look_at: reader.read_vector3()?,
            },
            1 => CameraSyncTarget::Element(reader.read_optional_element_id()?),
            mode => {
                return Err(DecodeError::InvalidValue {
                    field: "camera mode",
                    value: mode as u32,
                })
            }
        };
        Ok(Self {
            time_context,
            target,
        })
    }

    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.time_context);
        match self.target {
            CameraSyncTarget::Fixed { position, look_at } => {
                writer.write_u8(0);
                writer.write_vector3(position);
                writer.write_vector3(look_at);
            }
            CameraSyncTarget::Element(target) => {
                writer.write_u8(1);
                writer.write_optional_element_id(target);
            }
        }
    }
}

/// Echo of the server-accepted transform, sent to the syncing client only
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnSyncPacket {
    pub position: Vector3,
    /// Only echoed for vehicle sync
    pub rotation: Option<Vector3>,
}

impl Packet for ReturnSyncPacket {
    const ID: PacketId = PacketId::ReturnSync;
    const RELIABILITY: Reliability = Reliability::Sequenced;
    const PRIORITY: Priority = Priority::Medium;

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let position = reader.read_vector3()?;
        let rotation = if reader.read_bool("in vehicle")? {
            Some(reader.read_vector3()?)
        } else {
            None
        };
        Ok(Self { position, rotation })
    }

    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_vector3(self.position);
        writer.write_bool(self.rotation.is_some());
        if let Some(rotation) = self.rotation {
            writer.write_vector3(rotation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moving_player() -> PlayerPureSyncPacket {
        PlayerPureSyncPacket {
            player: ElementId(10),
            latency: 45,
            flags: PlayerFlags {
                is_on_ground: true,
                has_contact: true,
                is_stealth_aiming: true,
                ..PlayerFlags::default()
            },
            position: Vector3::new(1.0, 2.0, 3.0),
            rotation: 90.0,
            velocity: Vector3::new(0.1, 0.0, 0.0),
            health: 85.5,
            armor: 20.0,
            contact: Some(ElementId(3)),
            weapon: PlayerWeapon {
                slot: 2,
                weapon_type: 22,
                ammo: 120,
                ammo_in_clip: 17,
            },
            damage: Some(PlayerDamageInfo {
                damager: None,
                weapon: 22,
                body_part: 9,
            }),
            ..PlayerPureSyncPacket::default()
        }
    }

    #[test]
    fn pure_sync_survives_reencoding_byte_for_byte() {
        let bytes = moving_player().write();
        let decoded = PlayerPureSyncPacket::read(&bytes).unwrap();
        assert_eq!(decoded, moving_player());
        assert_eq!(decoded.write(), bytes);
    }

    #[test]
    fn unknown_flag_bits_are_rejected() {
        let mut bytes = moving_player().write().to_vec();
        // flags live right after the id and latency
        bytes[7] = 0xF0;
        assert!(matches!(
            PlayerPureSyncPacket::read(&bytes),
            Err(DecodeError::InvalidValue { field: "player flags", .. })
        ));
    }

    #[test]
    fn truncated_and_padded_payloads_fail() {
        let bytes = moving_player().write();
        assert!(matches!(
            PlayerPureSyncPacket::read(&bytes[..bytes.len() - 1]),
            Err(DecodeError::UnexpectedEof { .. })
        ));

        let mut padded = bytes.to_vec();
        padded.push(0);
        assert_eq!(
            PlayerPureSyncPacket::read(&padded),
            Err(DecodeError::TrailingBytes(1))
        );
    }

    #[test]
    fn camera_modes() {
        let fixed = CameraSyncPacket {
            time_context: 4,
            target: CameraSyncTarget::Fixed {
                position: Vector3::new(1.0, 1.0, 1.0),
                look_at: Vector3::ZERO,
            },
        };
        assert_eq!(CameraSyncPacket::read(&fixed.write()).unwrap(), fixed);

        let following = CameraSyncPacket {
            time_context: 5,
            target: CameraSyncTarget::Element(None),
        };
        assert_eq!(CameraSyncPacket::read(&following.write()).unwrap(), following);

        assert!(CameraSyncPacket::read(&[0, 7]).is_err());
    }

    #[test]
    fn key_sync_aim_is_optional() {
        let packet = KeySyncPacket {
            player: ElementId(2),
            keys: 0b1011,
            left_stick_x: -128,
            left_stick_y: 127,
            aim: Some((Vector3::ZERO, Vector3::new(0.0, 1.0, 0.0))),
        };
        let bytes = packet.write();
        assert_eq!(KeySyncPacket::read(&bytes).unwrap().write(), bytes);

        let idle = KeySyncPacket::default();
        assert_eq!(idle.write().len(), 4 + 4 + 2 + 2 + 1);
    }
}
