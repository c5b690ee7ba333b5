use gilrs::{Axis, Button, EventType, GamepadId, Gilrs};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// `value` is normalized to [-1, 1], positive to the right and down.
    AxisMotion { axis: u8, value: f64 },
    ButtonDown { button: u8 },
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("gamepad backend unavailable: {0}")]
    Backend(String),
    #[error("no gamepad at index {0}")]
    NoGamepad(u32),
    #[error("gamepad disconnected")]
    Disconnected,
}

/// Live, non-restartable stream of input events.
pub trait InputSource {
    /// Everything that arrived since the last call, without blocking.
    fn poll_events(&mut self) -> Result<Vec<InputEvent>, InputError>;
}

/// Axis numbering of the joystick API, left stick first.
pub fn axis_index(axis: Axis) -> Option<u8> {
    match axis {
        Axis::LeftStickX => Some(0),
        Axis::LeftStickY => Some(1),
        Axis::LeftZ => Some(2),
        Axis::RightStickX => Some(3),
        Axis::RightStickY => Some(4),
        Axis::RightZ => Some(5),
        _ => None,
    }
}

/// Button numbering of a DualShock-style pad, face buttons first.
pub fn button_index(button: Button) -> Option<u8> {
    match button {
        Button::South => Some(0),
        Button::East => Some(1),
        Button::North => Some(2),
        Button::West => Some(3),
        Button::LeftTrigger => Some(4),
        Button::RightTrigger => Some(5),
        Button::LeftTrigger2 => Some(6),
        Button::RightTrigger2 => Some(7),
        Button::Select => Some(8),
        Button::Start => Some(9),
        Button::Mode => Some(10),
        Button::LeftThumb => Some(11),
        Button::RightThumb => Some(12),
        _ => None,
    }
}

/// gilrs reports stick Y positive upwards; the joystick API, which the
/// axis settings follow, reports it positive downwards.
pub fn axis_event(axis: Axis, value: f32) -> Option<InputEvent> {
    let index = axis_index(axis)?;
    let value = match axis {
        Axis::LeftStickY | Axis::RightStickY => -value,
        _ => value,
    };
    Some(InputEvent::AxisMotion {
        axis: index,
        value: f64::from(value).clamp(-1.0, 1.0),
    })
}

/// Gamepad picked by its position among the pads connected at startup.
pub struct GamepadInput {
    gilrs: Gilrs,
    id: GamepadId,
    lost: bool,
}

impl GamepadInput {
    pub fn open(index: u32) -> Result<Self, InputError> {
        // gilrs::Error may carry the backend itself, which is not Send
        let gilrs = Gilrs::new().map_err(|err| InputError::Backend(err.to_string()))?;
        let (id, gamepad) = gilrs
            .gamepads()
            .nth(index as usize)
            .ok_or(InputError::NoGamepad(index))?;
        info!("gamepad {} opened: {}", index, gamepad.name());
        Ok(GamepadInput { gilrs, id, lost: false })
    }
}

impl InputSource for GamepadInput {
    fn poll_events(&mut self) -> Result<Vec<InputEvent>, InputError> {
        if self.lost {
            return Err(InputError::Disconnected);
        }

        let mut events = Vec::new();
        while let Some(event) = self.gilrs.next_event() {
            if event.id != self.id {
                continue;
            }
            match event.event {
                EventType::AxisChanged(axis, value, _) => events.extend(axis_event(axis, value)),
                EventType::ButtonPressed(button, _) => {
                    events.extend(button_index(button).map(|button| InputEvent::ButtonDown { button }))
                }
                EventType::Disconnected => {
                    warn!("gamepad disconnected");
                    self.lost = true;
                    break;
                }
                other => debug!("gamepad {:?}", other),
            }
        }

        if self.lost && events.is_empty() {
            return Err(InputError::Disconnected);
        }
        Ok(events)
    }
}
