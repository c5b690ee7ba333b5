use std::time::{Duration, Instant};

use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Outgoing, Packet, Publish};
use tracing::{debug, info, warn};

use super::{LastWill, Message, QoS, Transport, TransportError};

/// Upper bound on how long a single `poll` waits on the broker.
pub const POLL_WINDOW: Duration = Duration::from_millis(20);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 16;

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        }
    }
}

impl From<rumqttc::QoS> for QoS {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            _ => QoS::AtLeastOnce,
        }
    }
}

fn last_will(will: &LastWill) -> rumqttc::LastWill {
    rumqttc::LastWill::new(will.topic.as_str(), will.payload.as_bytes(), will.qos.into(), will.retain)
}

fn options(host: &str, port: u16, client_id: &str, will: Option<&LastWill>, keep_alive: Duration) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(keep_alive.max(MIN_KEEP_ALIVE));
    options.set_clean_session(true);
    if let Some(will) = will {
        options.set_last_will(last_will(will));
    }
    options
}

/// `None` when the payload is not UTF-8.
fn delivered(publish: &Publish) -> Option<Message> {
    let payload = String::from_utf8(publish.payload.to_vec()).ok()?;
    Some(Message::new(publish.topic.as_str(), payload, publish.qos.into(), publish.retain))
}

/// MQTT 3.1.1 client session.
///
/// The event loop only advances while [`Transport::poll`] (or `disconnect`)
/// drives it, which also keeps the broker's keep-alive satisfied.
pub struct MqttTransport {
    client: Client,
    connection: Connection,
    closed: bool,
}

impl MqttTransport {
    /// Connects and waits for the broker's CONNACK.
    pub fn connect(
        host: &str,
        port: u16,
        client_id: &str,
        will: Option<&LastWill>,
        keep_alive: Duration,
    ) -> Result<Self, TransportError> {
        let (client, mut connection) = Client::new(options(host, port, client_id, will, keep_alive), REQUEST_CAPACITY);

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(TransportError::Timeout);
            }
            match connection.recv_timeout(left) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Refused(format!("{:?}", ack.code)));
                    }
                    return Ok(MqttTransport {
                        client,
                        connection,
                        closed: false,
                    });
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(TransportError::Timeout),
            }
        }
    }
}

impl Transport for MqttTransport {
    fn publish(&mut self, message: Message) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.client
            .publish(message.topic, message.qos.into(), message.retain, message.payload.into_bytes())?;
        Ok(())
    }

    fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.client.subscribe(filter, qos.into())?;
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<Message>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let deadline = Instant::now() + POLL_WINDOW;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.connection.recv_timeout(left) {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => match delivered(&publish) {
                    Some(message) => return Ok(Some(message)),
                    None => warn!("dropping non UTF-8 payload on {}", publish.topic),
                },
                Ok(Ok(event)) => debug!("mqtt {:?}", event),
                Ok(Err(err)) => {
                    self.closed = true;
                    return Err(err.into());
                }
                Err(_) => return Ok(None),
            }
            if left.is_zero() {
                return Ok(None);
            }
        }
    }

    /// Queued publishes go out before the DISCONNECT, so the broker drops
    /// the last will only after seeing them.
    fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.closed = true;
        self.client.disconnect()?;

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        while Instant::now() < deadline {
            match self.connection.recv_timeout(POLL_WINDOW) {
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => return Ok(()),
                Ok(Ok(_)) | Err(_) => {}
                Ok(Err(err)) => return Err(err.into()),
            }
        }
        Err(TransportError::Timeout)
    }
}

/// Tries each candidate host in order and returns the first session the
/// broker accepts.
pub fn connect_first(
    hosts: &[String],
    port: u16,
    client_id: &str,
    will: Option<LastWill>,
    keep_alive: Duration,
) -> Result<MqttTransport, TransportError> {
    for host in hosts {
        info!("try connection: {}:{}", host, port);
        match MqttTransport::connect(host, port, client_id, will.as_ref(), keep_alive) {
            Ok(transport) => {
                info!("connected to {}:{} as {}", host, port, client_id);
                return Ok(transport);
            }
            Err(err) => warn!("failed connection: {}:{} ({})", host, port, err),
        }
    }
    Err(TransportError::NoReachableHost(hosts.to_vec()))
}
