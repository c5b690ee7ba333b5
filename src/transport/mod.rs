//! Publish/subscribe transport contract and its realisations.
//!
//! Processes only ever talk through a [`Transport`]: publish with a QoS and a
//! retain flag, subscribe to a topic filter, and poll for delivered messages.
//! The last will is handed over when the transport is connected and is
//! published by the broker if the session ends without a clean disconnect.
//!
//! [`MqttTransport`] talks to a real MQTT broker. [`MemoryTransport`] routes
//! through an in-process [`Broker`] with the same retain and will rules.

pub mod broker;
pub mod memory;
pub mod mqtt;

use thiserror::Error;

pub use broker::{Broker, SessionId, SharedBroker, topic_matches};
pub use memory::MemoryTransport;
pub use mqtt::{MqttTransport, POLL_WINDOW, connect_first};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, qos: QoS, retain: bool) -> Self {
        Message {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }
}

/// Message the broker publishes on behalf of a client that vanished.
pub type LastWill = Message;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not reach any of {0:?}")]
    NoReachableHost(Vec<String>),
    #[error("session is closed")]
    Closed,
    #[error("broker did not answer in time")]
    Timeout,
    #[error("broker refused the connection: {0}")]
    Refused(String),
    #[error("mqtt request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("mqtt connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
}

pub trait Transport {
    fn publish(&mut self, message: Message) -> Result<(), TransportError>;

    fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), TransportError>;

    /// Next delivered message, or `None` if nothing arrived within the
    /// transport's short poll window. Also services keep-alive.
    fn poll(&mut self) -> Result<Option<Message>, TransportError>;

    /// Clean disconnect: the broker discards the last will.
    fn disconnect(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn publish(&mut self, message: Message) -> Result<(), TransportError> {
        (**self).publish(message)
    }

    fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        (**self).subscribe(filter, qos)
    }

    fn poll(&mut self) -> Result<Option<Message>, TransportError> {
        (**self).poll()
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect()
    }
}
