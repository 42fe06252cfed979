//! Chat command intake

use std::sync::Arc;
use tracing::{debug, info};

use super::{SyncContext, SyncError, SyncHandler};
use crate::client::Client;
use crate::packets::CommandPacket;
use crate::world::WorldEvent;

/// Turns console commands into [`WorldEvent::PlayerCommand`]
pub struct CommandHandler {
    context: Arc<SyncContext>,
}

impl CommandHandler {
    pub fn new(context: Arc<SyncContext>) -> Self {
        Self { context }
    }
}

impl SyncHandler for CommandHandler {
    type Packet = CommandPacket;

    fn handle(&self, client: &Client, packet: CommandPacket) -> Result<(), SyncError> {
        let command = packet.command.trim();
        if command.is_empty() {
            debug!(player = %client.player(), "Empty command ignored");
            return Ok(());
        }

        info!(player = %client.player(), command = %command, "Player command");
        self.context.events.publish(WorldEvent::PlayerCommand {
            player: client.player(),
            command: command.to_owned(),
            arguments: packet.argument_list(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::Harness;
    use crate::world::ElementId;

    #[test]
    fn command_is_published_with_split_arguments() {
        let harness = Harness::new();
        let sender = harness.connect(1, 10);
        let mut events = harness.context.events.subscribe();
        let handler = CommandHandler::new(harness.context.clone());

        handler
            .handle(
                &sender,
                CommandPacket {
                    command: "tp".into(),
                    arguments: "100 200  5".into(),
                },
            )
            .unwrap();
        handler
            .handle(
                &sender,
                CommandPacket {
                    command: "  ".into(),
                    arguments: String::new(),
                },
            )
            .unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            WorldEvent::PlayerCommand {
                player: ElementId(10),
                command: "tp".into(),
                arguments: vec!["100".into(), "200".into(), "5".into()],
            }
        );
        assert!(events.try_recv().is_err());
    }
}
