//! Binary packet definitions
//!
//! Every packet body is a fixed sequence of little-endian fields. Decoding
//! rejects truncated input, out-of-range enum/bool bytes and trailing data, so
//! a successfully decoded packet re-encodes to the exact same bytes.

pub mod codec;
mod command;
mod player;
mod vehicle;

pub use codec::{DecodeError, PacketReader, PacketWriter};
pub use command::CommandPacket;
pub use player::{
    CameraSyncPacket, CameraSyncTarget, KeySyncPacket, PlayerDamageInfo, PlayerPureSyncPacket,
    ReturnSyncPacket,
};
pub use vehicle::{TrailerSync, VehicleDamageSync, VehiclePureSyncPacket};

use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// First byte of every datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PacketId {
    PlayerQuit = 0x10,
    PlayerTimeout = 0x11,
    PlayerNoSocket = 0x12,
    PlayerPureSync = 0x20,
    PlayerKeySync = 0x21,
    CameraSync = 0x22,
    VehiclePureSync = 0x23,
    ReturnSync = 0x24,
    Command = 0x30,
}

impl PacketId {
    /// Connection lifecycle signals, handled inline instead of queued
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            PacketId::PlayerQuit | PacketId::PlayerTimeout | PacketId::PlayerNoSocket
        )
    }
}

impl TryFrom<u8> for PacketId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x10 => PacketId::PlayerQuit,
            0x11 => PacketId::PlayerTimeout,
            0x12 => PacketId::PlayerNoSocket,
            0x20 => PacketId::PlayerPureSync,
            0x21 => PacketId::PlayerKeySync,
            0x22 => PacketId::CameraSync,
            0x23 => PacketId::VehiclePureSync,
            0x24 => PacketId::ReturnSync,
            0x30 => PacketId::Command,
            other => return Err(other),
        })
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Delivery guarantee requested from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reliability {
    Unreliable,
    Reliable,
    Sequenced,
    ReliableSequenced,
    Ordered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

pub trait Packet: Sized {
    const ID: PacketId;
    const RELIABILITY: Reliability;
    const PRIORITY: Priority;

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, DecodeError>;

    fn encode(&self, writer: &mut PacketWriter);

    /// Decode a whole payload; leftover bytes are an error
    fn read(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = PacketReader::new(payload);
        let packet = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(packet)
    }

    fn write(&self) -> Bytes {
        let mut writer = PacketWriter::new();
        self.encode(&mut writer);
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_ids_map_both_ways() {
        for id in [
            PacketId::PlayerQuit,
            PacketId::PlayerTimeout,
            PacketId::PlayerNoSocket,
            PacketId::PlayerPureSync,
            PacketId::PlayerKeySync,
            PacketId::CameraSync,
            PacketId::VehiclePureSync,
            PacketId::ReturnSync,
            PacketId::Command,
        ] {
            assert_eq!(PacketId::try_from(id as u8), Ok(id));
        }
        assert_eq!(PacketId::try_from(0xFF), Err(0xFF));
        assert!(PacketId::PlayerTimeout.is_lifecycle());
        assert!(!PacketId::CameraSync.is_lifecycle());
    }
}
