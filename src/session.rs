use tracing::{info, warn};

use crate::transport::{LastWill, Message, QoS, Transport, TransportError};

pub const PRESENT: &str = "1";
pub const ABSENT: &str = "0";

/// Last will matching a presence topic: absent, retained, QoS 1.
pub fn presence_will(topic: &str) -> LastWill {
    Message::new(topic, ABSENT, QoS::AtLeastOnce, true)
}

/// A connected transport plus the presence flag it is responsible for.
///
/// Created once at startup and handed by reference to whatever needs the
/// transport. [`Session::close`] is the single release path for both the
/// signal handler and normal shutdown.
pub struct Session<T: Transport> {
    transport: T,
    presence_topic: String,
    closed: bool,
}

impl<T: Transport> Session<T> {
    /// Announces presence on an already connected transport. The transport is
    /// expected to carry [`presence_will`] for the same topic.
    pub fn open(mut transport: T, presence_topic: &str) -> Result<Self, TransportError> {
        transport.publish(Message::new(presence_topic, PRESENT, QoS::AtLeastOnce, true))?;
        info!("presence {} set", presence_topic);
        Ok(Session {
            transport,
            presence_topic: presence_topic.to_string(),
            closed: false,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn publish(&mut self, message: Message) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.transport.publish(message)
    }

    pub fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.transport.subscribe(filter, qos)
    }

    pub fn poll(&mut self) -> Result<Option<Message>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.transport.poll()
    }

    /// Publishes absent and disconnects. Both steps are attempted even if the
    /// first fails; later calls do nothing.
    pub fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let absent = self.transport.publish(Message::new(
            self.presence_topic.as_str(),
            ABSENT,
            QoS::AtLeastOnce,
            true,
        ));
        if let Err(err) = &absent {
            warn!("could not publish absent on {}: {}", self.presence_topic, err);
        }
        let disconnected = self.transport.disconnect();
        info!("session for {} closed", self.presence_topic);
        absent.and(disconnected)
    }
}
