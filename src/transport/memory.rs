use std::sync::MutexGuard;

use super::broker::{SharedBroker, lock};
use super::{Broker, LastWill, Message, QoS, SessionId, Transport, TransportError};

/// In-process transport bound to a shared [`Broker`].
///
/// Dropping a still-connected handle ends the session uncleanly, which is how
/// tests stand in for a process that dies without saying goodbye.
pub struct MemoryTransport {
    broker: SharedBroker,
    session: SessionId,
    connected: bool,
}

impl MemoryTransport {
    pub fn connect(broker: &SharedBroker, client_id: &str, will: Option<LastWill>) -> Self {
        let session = lock(broker).connect(client_id, will);
        MemoryTransport {
            broker: SharedBroker::clone(broker),
            session,
            connected: true,
        }
    }

    fn broker(&self) -> Result<MutexGuard<'_, Broker>, TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        let broker = lock(&self.broker);
        if !broker.is_connected(self.session) {
            return Err(TransportError::Closed);
        }
        Ok(broker)
    }
}

impl Transport for MemoryTransport {
    fn publish(&mut self, message: Message) -> Result<(), TransportError> {
        self.broker()?.publish(message);
        Ok(())
    }

    fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        let session = self.session;
        self.broker()?.subscribe(session, filter, qos);
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<Message>, TransportError> {
        let session = self.session;
        Ok(self.broker()?.next_message(session))
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let session = self.session;
        self.broker()?.disconnect(session);
        self.connected = false;
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if self.connected {
            lock(&self.broker).drop_session(self.session);
        }
    }
}
