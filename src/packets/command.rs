//! Command packet: raw command line typed by a player

use super::codec::{DecodeError, PacketReader, PacketWriter};
use super::{Packet, PacketId, Priority, Reliability};

/// Console command typed by a player
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandPacket {
    pub command: String,
    /// Raw argument string, split on whitespace by the handler
    pub arguments: String,
}

impl CommandPacket {
    pub fn argument_list(&self) -> Vec<String> {
        self.arguments.split_whitespace().map(str::to_owned).collect()
    }
}

impl Packet for CommandPacket {
    const ID: PacketId = PacketId::Command;
    const RELIABILITY: Reliability = Reliability::ReliableSequenced;
    const PRIORITY: Priority = Priority::High;

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            command: reader.read_string()?,
            arguments: reader.read_string()?,
        })
    }

    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_string(&self.command);
        writer.write_string(&self.arguments);
    }
}
