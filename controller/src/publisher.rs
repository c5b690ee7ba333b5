use chrono::{DateTime, Local};
use tracing::{debug, info};

use teleop::transport::{Message, QoS, Transport, TransportError};
use teleop::{DriveCommand, Session, Topics};

/// Sends `command` unless its payload equals `last_sent`, and returns the
/// dedup cursor to use for the next tick.
pub fn publish_drive<T: Transport>(
    session: &mut Session<T>,
    topic: &str,
    command: &DriveCommand,
    last_sent: Option<&str>,
) -> Result<String, TransportError> {
    let payload = command.to_payload();
    if last_sent == Some(payload.as_str()) {
        return Ok(payload);
    }
    session.publish(Message::new(topic, payload.as_str(), QoS::AtMostOnce, false))?;
    debug!("drive {}", payload);
    Ok(payload)
}

pub fn timestamp(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Operator side sender for one robot.
pub struct Publisher<'s, T: Transport> {
    session: &'s mut Session<T>,
    topics: Topics,
    last_sent: Option<String>,
}

impl<'s, T: Transport> Publisher<'s, T> {
    pub fn new(session: &'s mut Session<T>, topics: Topics) -> Self {
        Publisher {
            session,
            topics,
            last_sent: None,
        }
    }

    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    /// Returns whether anything was transmitted.
    pub fn drive(&mut self, command: &DriveCommand) -> Result<bool, TransportError> {
        let payload = publish_drive(
            self.session,
            &self.topics.servos(),
            command,
            self.last_sent.as_deref(),
        )?;
        let sent = self.last_sent.as_deref() != Some(payload.as_str());
        self.last_sent = Some(payload);
        Ok(sent)
    }

    /// Sends regardless of the dedup cursor.
    pub fn force_drive(&mut self, command: &DriveCommand) -> Result<(), TransportError> {
        let payload = publish_drive(self.session, &self.topics.servos(), command, None)?;
        info!("drive {} (forced)", payload);
        self.last_sent = Some(payload);
        Ok(())
    }

    pub fn button(&mut self, button: u8, at: DateTime<Local>) -> Result<(), TransportError> {
        let payload = format!("{},{}", timestamp(at), button);
        debug!("button {}", button);
        self.session.publish(Message::new(
            self.topics.controller_button(),
            payload,
            QoS::AtMostOnce,
            false,
        ))
    }

    pub fn status(&mut self, command: &str) -> Result<(), TransportError> {
        info!("status {}", command);
        self.session.publish(Message::new(
            self.topics.status(),
            command,
            QoS::AtMostOnce,
            false,
        ))
    }

    /// Drains whatever the broker pushed and keeps the link alive.
    pub fn service(&mut self) -> Result<(), TransportError> {
        while let Some(message) = self.session.poll()? {
            debug!("ignoring {} on {}", message.payload, message.topic);
        }
        Ok(())
    }
}
