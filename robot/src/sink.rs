use tracing::{debug, warn};

use teleop::transport::Message;
use teleop::{DriveCommand, PayloadError};

use crate::actuator::Actuator;

#[derive(Debug, PartialEq)]
pub enum Delivery {
    Applied(DriveCommand),
    Dropped(PayloadError),
    Ignored,
}

/// Sole consumer of the drive topic on the robot.
pub struct CommandSink<'a> {
    topic: String,
    actuator: &'a Actuator,
}

impl<'a> CommandSink<'a> {
    pub fn new(topic: impl Into<String>, actuator: &'a Actuator) -> Self {
        CommandSink {
            topic: topic.into(),
            actuator,
        }
    }

    /// Parses and applies one delivery. Returns only after both wheels were
    /// written, so the next message cannot overtake this one.
    pub fn handle(&self, message: &Message) -> Delivery {
        if message.topic != self.topic {
            return Delivery::Ignored;
        }

        match DriveCommand::from_payload(message.payload.as_bytes()) {
            Ok(command) => {
                debug!("applying {}", command);
                self.actuator.apply(&command);
                Delivery::Applied(command)
            }
            Err(err) => {
                warn!("dropping {:?} on {}: {}", message.payload, message.topic, err);
                Delivery::Dropped(err)
            }
        }
    }
}
