use tracing::{info, warn};

use teleop::session::ABSENT;
use teleop::transport::{Message, QoS, Transport, TransportError};
use teleop::{Session, Shutdown, Topics};

use crate::actuator::Actuator;
use crate::sink::CommandSink;

/// Robot side of one broker link: routes deliveries to the sink and reacts
/// to the controller going away.
pub struct Agent<'a> {
    topics: Topics,
    sink: CommandSink<'a>,
    actuator: &'a Actuator,
    release_on_controller_loss: bool,
}

impl<'a> Agent<'a> {
    pub fn new(topics: Topics, actuator: &'a Actuator, release_on_controller_loss: bool) -> Self {
        Agent {
            sink: CommandSink::new(topics.servos(), actuator),
            topics,
            actuator,
            release_on_controller_loss,
        }
    }

    pub fn attach<T: Transport>(&self, session: &mut Session<T>) -> Result<(), TransportError> {
        session.subscribe(&self.topics.servos(), QoS::AtMostOnce)?;
        session.subscribe(&self.topics.status(), QoS::AtMostOnce)?;
        session.subscribe(&self.topics.command(), QoS::AtMostOnce)?;
        if self.release_on_controller_loss {
            session.subscribe(&self.topics.controller_connection(), QoS::AtLeastOnce)?;
        }
        info!("listening on {}", self.topics.servos());
        Ok(())
    }

    /// Handles everything delivered so far. Returns how many messages that was.
    pub fn pump<T: Transport>(&self, session: &mut Session<T>) -> Result<usize, TransportError> {
        let mut handled = 0;
        while let Some(message) = session.poll()? {
            self.deliver(&message);
            handled += 1;
        }
        Ok(handled)
    }

    /// Runs until shutdown is requested or the link fails.
    pub fn serve<T: Transport>(&self, session: &mut Session<T>, shutdown: &Shutdown) -> Result<(), TransportError> {
        while !shutdown.is_triggered() {
            self.pump(session)?;
        }
        Ok(())
    }

    fn deliver(&self, message: &Message) {
        let topic = message.topic.as_str();
        if topic == self.topics.controller_connection() {
            if message.payload == ABSENT {
                warn!("controller gone, releasing wheels");
                // release() already logged whatever failed
                let _ = self.actuator.release();
            } else {
                info!("controller present");
            }
        } else if topic == self.topics.status() || topic == self.topics.command() {
            info!("{}: {}", topic, message.payload);
        } else {
            self.sink.handle(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::actuator::NEUTRAL_DUTY;
    use crate::actuator::tests::recording_actuator;
    use teleop::presence_will;
    use teleop::transport::{Broker, MemoryTransport, SharedBroker};

    fn broker() -> SharedBroker {
        Arc::new(Mutex::new(Broker::new()))
    }

    fn robot_session(broker: &SharedBroker, topics: &Topics) -> Session<MemoryTransport> {
        let transport = MemoryTransport::connect(broker, "nobunaga", Some(presence_will(&topics.connection())));
        Session::open(transport, &topics.connection()).unwrap()
    }

    fn controller_session(broker: &SharedBroker, topics: &Topics) -> Session<MemoryTransport> {
        let topic = topics.controller_connection();
        let transport = MemoryTransport::connect(broker, "nobunaga-controller", Some(presence_will(&topic)));
        Session::open(transport, &topic).unwrap()
    }

    fn servos(topics: &Topics, payload: &str) -> Message {
        Message::new(topics.servos(), payload, QoS::AtMostOnce, false)
    }

    #[test]
    fn commands_are_applied_in_arrival_order() {
        let broker = broker();
        let topics = Topics::new("nobunaga");
        let (actuator, left, _right) = recording_actuator();
        let agent = Agent::new(topics.clone(), &actuator, true);

        let mut robot = robot_session(&broker, &topics);
        agent.attach(&mut robot).unwrap();
        let mut controller = controller_session(&broker, &topics);

        controller.publish(servos(&topics, "12,2.5")).unwrap();
        controller.publish(servos(&topics, "bogus")).unwrap();
        controller.publish(servos(&topics, "7.2,7.6")).unwrap();
        controller.publish(Message::new(topics.status(), "shot", QoS::AtMostOnce, false)).unwrap();

        // controller presence, then the four publishes
        assert_eq!(agent.pump(&mut robot).unwrap(), 5);

        let (l, r) = actuator.states();
        assert_eq!((l.duty_cycle, r.duty_cycle), (7.2, 7.6));
        let writes = left.lock().unwrap().writes.clone();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], 0.12);
    }

    #[test]
    fn vanished_controller_releases_the_wheels() {
        let broker = broker();
        let topics = Topics::new("nobunaga");
        let (actuator, left, right) = recording_actuator();
        let agent = Agent::new(topics.clone(), &actuator, true);

        let mut robot = robot_session(&broker, &topics);
        agent.attach(&mut robot).unwrap();
        let mut controller = controller_session(&broker, &topics);
        controller.publish(servos(&topics, "12,2.5")).unwrap();
        agent.pump(&mut robot).unwrap();
        assert!(actuator.states().0.enabled);

        // dies without a clean disconnect, the broker publishes its will
        drop(controller);
        agent.pump(&mut robot).unwrap();

        let (l, r) = actuator.states();
        assert_eq!((l.duty_cycle, l.enabled), (NEUTRAL_DUTY, false));
        assert_eq!((r.duty_cycle, r.enabled), (NEUTRAL_DUTY, false));
        assert_eq!(left.lock().unwrap().releases, 1);
        assert_eq!(right.lock().unwrap().releases, 1);
    }

    #[test]
    fn controller_presence_can_be_ignored() {
        let broker = broker();
        let topics = Topics::new("nobunaga");
        let (actuator, left, _right) = recording_actuator();
        let agent = Agent::new(topics.clone(), &actuator, false);

        let mut robot = robot_session(&broker, &topics);
        agent.attach(&mut robot).unwrap();
        let mut controller = controller_session(&broker, &topics);
        controller.publish(servos(&topics, "12,2.5")).unwrap();
        controller.close().unwrap();
        agent.pump(&mut robot).unwrap();

        assert!(actuator.states().0.enabled);
        assert_eq!(left.lock().unwrap().releases, 0);
    }

    #[test]
    fn taken_over_session_ends_serving() {
        let broker = broker();
        let topics = Topics::new("nobunaga");
        let (actuator, _left, _right) = recording_actuator();
        let agent = Agent::new(topics.clone(), &actuator, true);

        let mut robot = robot_session(&broker, &topics);
        agent.attach(&mut robot).unwrap();
        let _newer = MemoryTransport::connect(&broker, "nobunaga", None);

        let shutdown = Shutdown::new();
        assert!(matches!(agent.serve(&mut robot, &shutdown), Err(TransportError::Closed)));
    }
}
