use chrono::Local;
use thiserror::Error;
use tracing::{info, warn};

use teleop::DriveCommand;
use teleop::transport::{Transport, TransportError};

use crate::config::{ButtonAction, ButtonBindings, ServoProfile, Trim, Wheel};
use crate::joystick::{InputError, InputEvent, InputSource};
use crate::mapping::{AxisState, DriveMapping};
use crate::publisher::{Publisher, timestamp};

#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// Turns device events into one drive command per tick.
pub struct CommandSource<I: InputSource> {
    input: I,
    axes: AxisState,
    mapping: DriveMapping,
    left: ServoProfile,
    right: ServoProfile,
    buttons: ButtonBindings,
    trim_step: f64,
}

impl<I: InputSource> CommandSource<I> {
    pub fn new(
        input: I,
        mapping: DriveMapping,
        (left, right): (ServoProfile, ServoProfile),
        buttons: ButtonBindings,
        trim_step: f64,
    ) -> Self {
        info!("left: {}, right: {}", left, right);
        CommandSource {
            input,
            axes: AxisState::default(),
            mapping,
            left,
            right,
            buttons,
            trim_step,
        }
    }

    pub fn profiles(&self) -> (ServoProfile, ServoProfile) {
        (self.left, self.right)
    }

    pub fn neutral(&self) -> DriveCommand {
        self.mapping.neutral()
    }

    pub fn current_command(&self) -> DriveCommand {
        self.mapping.command(&self.axes, &self.left, &self.right)
    }

    /// Applies pending events, then publishes the resulting command.
    ///
    /// Every event is handled even if publishing one of the button messages
    /// fails; the first transport error is reported after the drive command
    /// has been attempted.
    pub fn tick<T: Transport>(&mut self, publisher: &mut Publisher<'_, T>) -> Result<DriveCommand, TickError> {
        let mut failure = None;

        for event in self.input.poll_events()? {
            match event {
                InputEvent::AxisMotion { axis, value } => self.axes.set(axis, value),
                InputEvent::ButtonDown { button } => {
                    if let Err(err) = self.on_button(button, publisher) {
                        failure.get_or_insert(err);
                    }
                }
            }
        }

        let command = self.current_command();
        if let Err(err) = publisher.drive(&command) {
            failure.get_or_insert(err);
        }

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(command),
        }
    }

    fn on_button<T: Transport>(&mut self, button: u8, publisher: &mut Publisher<'_, T>) -> Result<(), TransportError> {
        let now = Local::now();
        let sent = publisher.button(button, now);

        match self.buttons.action(button) {
            Some(ButtonAction::Trigger) => {
                publisher.status(&format!("{},shot", timestamp(now)))?;
            }
            Some(ButtonAction::Trim(wheel, trim)) => self.trim(wheel, trim),
            None => {}
        }
        sent
    }

    fn trim(&mut self, wheel: Wheel, trim: Trim) {
        let profile = match wheel {
            Wheel::Left => &mut self.left,
            Wheel::Right => &mut self.right,
        };
        if profile.trim(trim, self.trim_step) {
            info!("{} {}", wheel, profile);
        } else {
            warn!("{} trim {:?} rejected, band would invert or leave 0..=100: {}", wheel, trim, profile);
        }
    }
}
