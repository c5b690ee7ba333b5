use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use super::{LastWill, Message, QoS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

pub type SharedBroker = Arc<Mutex<Broker>>;

/// Locks a shared broker. Every broker operation leaves it consistent, so a
/// poisoned lock is still usable.
pub fn lock(shared: &SharedBroker) -> MutexGuard<'_, Broker> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ClientSession {
    client_id: String,
    subscriptions: Vec<(String, QoS)>,
    outbox: VecDeque<Message>,
    will: Option<LastWill>,
}

/// In-process stand-in for an MQTT broker, reached through
/// [`super::MemoryTransport`].
///
/// Holds the retained message of every topic and one outbox per session.
#[derive(Default)]
pub struct Broker {
    sessions: HashMap<SessionId, ClientSession>,
    retained: BTreeMap<String, Message>,
    next_id: u64,
}

impl Broker {
    pub fn new() -> Self {
        Broker::default()
    }

    /// Opens a session. A client id that is already connected takes the
    /// session over and the previous holder is dropped as if it had died.
    pub fn connect(&mut self, client_id: &str, will: Option<LastWill>) -> SessionId {
        let existing: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.client_id == client_id)
            .map(|(id, _)| *id)
            .collect();
        for id in existing {
            info!("client {} reconnected, dropping previous session", client_id);
            self.drop_session(id);
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(
            id,
            ClientSession {
                client_id: client_id.to_string(),
                subscriptions: Vec::new(),
                outbox: VecDeque::new(),
                will,
            },
        );
        debug!("client {} connected as {:?}", client_id, id);
        id
    }

    pub fn is_connected(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Registers a filter and queues every retained message it matches.
    pub fn subscribe(&mut self, id: SessionId, filter: &str, qos: QoS) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        session.subscriptions.retain(|(f, _)| f != filter);
        session.subscriptions.push((filter.to_string(), qos));

        for retained in self.retained.values() {
            if topic_matches(filter, &retained.topic) {
                let mut delivered = retained.clone();
                delivered.qos = delivered.qos.min(qos);
                session.outbox.push_back(delivered);
            }
        }
        true
    }

    pub fn publish(&mut self, message: Message) {
        if message.retain {
            if message.payload.is_empty() {
                self.retained.remove(&message.topic);
            } else {
                self.retained.insert(message.topic.clone(), message.clone());
            }
        }

        for session in self.sessions.values_mut() {
            let granted = session
                .subscriptions
                .iter()
                .filter(|(f, _)| topic_matches(f, &message.topic))
                .map(|(_, q)| *q)
                .max();
            if let Some(qos) = granted {
                // Live deliveries never carry the retain flag.
                session.outbox.push_back(Message {
                    qos: message.qos.min(qos),
                    retain: false,
                    ..message.clone()
                });
            }
        }
    }

    pub fn drain(&mut self, id: SessionId) -> Vec<Message> {
        match self.sessions.get_mut(&id) {
            Some(session) => session.outbox.drain(..).collect(),
            None => Vec::new(),
        }
    }

    pub fn next_message(&mut self, id: SessionId) -> Option<Message> {
        self.sessions.get_mut(&id).and_then(|s| s.outbox.pop_front())
    }

    /// Clean disconnect: the last will is discarded.
    pub fn disconnect(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.remove(&id) {
            debug!("client {} disconnected", session.client_id);
        }
    }

    /// Unclean end of a session: the last will, if any, is published.
    pub fn drop_session(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.remove(&id) {
            info!("client {} lost", session.client_id);
            if let Some(will) = session.will {
                info!("publishing last will of {} on {}", session.client_id, will.topic);
                self.publish(will);
            }
        }
    }

    pub fn retained(&self, topic: &str) -> Option<&Message> {
        self.retained.get(topic)
    }
}

/// Topic filter matching with `+` (one level) and `#` (all remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(payload: &str) -> Message {
        Message::new("nobunaga/connection", payload, QoS::AtLeastOnce, true)
    }

    #[test]
    fn wildcard_filters() {
        assert!(topic_matches("nobunaga/servos", "nobunaga/servos"));
        assert!(topic_matches("nobunaga/#", "nobunaga/controller/button"));
        assert!(topic_matches("+/connection", "nobunaga/connection"));
        assert!(!topic_matches("+/connection", "nobunaga/controller/connection"));
        assert!(!topic_matches("nobunaga/servos", "nobunaga/servos/extra"));
        assert!(!topic_matches("nobunaga/servos/extra", "nobunaga/servos"));
    }

    #[test]
    fn subscriber_receives_live_messages_only_for_matching_topics() {
        let mut broker = Broker::new();
        let robot = broker.connect("robot", None);
        broker.subscribe(robot, "nobunaga/servos", QoS::AtMostOnce);

        broker.publish(Message::new("nobunaga/servos", "1,2", QoS::AtMostOnce, false));
        broker.publish(Message::new("nobunaga/status", "shot", QoS::AtMostOnce, false));

        let received = broker.drain(robot);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload, "1,2");
    }

    #[test]
    fn late_subscriber_gets_retained_value() {
        let mut broker = Broker::new();
        broker.publish(presence("1"));

        let observer = broker.connect("observer", None);
        broker.subscribe(observer, "nobunaga/connection", QoS::AtLeastOnce);

        let received = broker.drain(observer);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload, "1");
        assert!(received[0].retain);
    }

    #[test]
    fn delivered_qos_is_capped_by_subscription() {
        let mut broker = Broker::new();
        let observer = broker.connect("observer", None);
        broker.subscribe(observer, "nobunaga/connection", QoS::AtMostOnce);
        broker.publish(presence("1"));
        assert_eq!(broker.drain(observer)[0].qos, QoS::AtMostOnce);
    }

    #[test]
    fn empty_retained_payload_clears_topic() {
        let mut broker = Broker::new();
        broker.publish(presence("1"));
        broker.publish(presence(""));
        assert!(broker.retained("nobunaga/connection").is_none());
    }

    #[test]
    fn abrupt_drop_publishes_will_and_clean_disconnect_does_not() {
        let mut broker = Broker::new();
        let clean = broker.connect("clean", Some(presence("0")));
        broker.publish(presence("1"));
        broker.disconnect(clean);
        assert_eq!(broker.retained("nobunaga/connection").unwrap().payload, "1");

        let dying = broker.connect("dying", Some(presence("0")));
        broker.drop_session(dying);
        assert_eq!(broker.retained("nobunaga/connection").unwrap().payload, "0");
        assert!(!broker.is_connected(dying));
    }

    #[test]
    fn reconnecting_client_id_replaces_old_session() {
        let mut broker = Broker::new();
        let first = broker.connect("robot", Some(presence("0")));
        broker.publish(presence("1"));
        let second = broker.connect("robot", Some(presence("0")));

        assert!(!broker.is_connected(first));
        assert!(broker.is_connected(second));
        assert_eq!(broker.retained("nobunaga/connection").unwrap().payload, "0");
    }
}
