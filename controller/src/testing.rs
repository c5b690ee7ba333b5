use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use teleop::transport::{Broker, MemoryTransport, Message, QoS, SharedBroker, Transport};
use teleop::{Session, Topics, presence_will};

use crate::config::{ButtonBindings, ServoProfile};
use crate::joystick::{InputError, InputEvent, InputSource};
use crate::mapping::{DriveMapping, DrivePresets, MappingConfig};
use crate::source::CommandSource;

/// Hands out one scripted batch of events per poll, then reports the device gone.
pub struct Scripted {
    batches: VecDeque<Vec<InputEvent>>,
}

impl Scripted {
    pub fn new(batches: Vec<Vec<InputEvent>>) -> Self {
        Scripted {
            batches: batches.into(),
        }
    }
}

impl InputSource for Scripted {
    fn poll_events(&mut self) -> Result<Vec<InputEvent>, InputError> {
        self.batches.pop_front().ok_or(InputError::Disconnected)
    }
}

pub fn axis(axis: u8, value: f64) -> InputEvent {
    InputEvent::AxisMotion { axis, value }
}

pub fn button(button: u8) -> InputEvent {
    InputEvent::ButtonDown { button }
}

/// Source with a [2.5, 12] band on both wheels, idling at 0.1.
pub fn command_source<I: InputSource>(input: I) -> CommandSource<I> {
    let band = ServoProfile {
        duty_cycle_max: 12.0,
        duty_cycle_min: 2.5,
    };
    let presets = DrivePresets {
        neutral: 0.0,
        idle: 0.1,
        rotate_positive: 7.6,
        rotate_negative: 7.2,
    };
    CommandSource::new(
        input,
        DriveMapping::new(MappingConfig::default(), presets),
        (band, band),
        ButtonBindings::default(),
        0.1,
    )
}

/// In-memory broker with an observer subscribed to the whole robot namespace.
pub struct Rig {
    broker: SharedBroker,
    observer: MemoryTransport,
}

impl Rig {
    pub fn new() -> Self {
        let broker: SharedBroker = Arc::new(Mutex::new(Broker::new()));
        let mut observer = MemoryTransport::connect(&broker, "observer", None);
        observer.subscribe("nobunaga/#", QoS::AtMostOnce).unwrap();
        Rig { broker, observer }
    }

    pub fn broker(&self) -> &SharedBroker {
        &self.broker
    }

    pub fn session(&self) -> Session<MemoryTransport> {
        let topic = Topics::new("nobunaga").controller_connection();
        let transport = MemoryTransport::connect(&self.broker, "controller", Some(presence_will(&topic)));
        Session::open(transport, &topic).unwrap()
    }

    /// Drains the observer, keeping messages on `topic`.
    pub fn received(&mut self, topic: &str) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.observer.poll().unwrap() {
            if message.topic == topic {
                messages.push(message);
            }
        }
        messages
    }
}
