mod config;
mod joystick;
mod link;
mod mapping;
mod publisher;
mod source;
#[cfg(test)]
mod testing;

use config::ControllerSettings;
use joystick::GamepadInput;
use link::Timing;
use mapping::{DriveMapping, DrivePresets};
use source::CommandSource;

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use teleop::transport::connect_first;
use teleop::{Session, Shutdown, Topics, logging, presence_will};

const SETTINGS_PATH: &str = "controller.json";

fn main() -> Result<()> {
    let path = env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(SETTINGS_PATH));
    let settings = ControllerSettings::load_or_create(&path)?;
    logging::init(settings.log_level);

    let profiles = settings.validate().context("refusing to start")?;
    info!("robot: {}, brokers: {:?}", settings.robot_name, settings.hosts);

    let gamepad = GamepadInput::open(settings.joystick_index)?;
    let shutdown = Shutdown::install().context("cannot install signal handler")?;

    let topics = Topics::new(&settings.robot_name);
    let presence_topic = topics.controller_connection();
    let client_id = format!("{}-controller", settings.robot_name);
    let keep_alive = Duration::from_secs(settings.keep_alive_secs);

    let mapping = DriveMapping::new(
        settings.mapping.clone(),
        DrivePresets {
            neutral: settings.neutral_duty,
            idle: settings.idle_duty,
            rotate_positive: settings.right_rotate,
            rotate_negative: settings.left_rotate,
        },
    );
    let mut source = CommandSource::new(gamepad, mapping, profiles, settings.buttons, settings.trim_step);

    let timing = Timing {
        tick: Duration::from_millis(settings.tick_ms),
        reconnect: Duration::from_secs(settings.reconnect_secs),
    };
    let outcome = link::operate(&mut source, &topics, &shutdown, timing, || {
        info!("controller for {} connecting to {:?}", settings.robot_name, settings.hosts);
        let transport = connect_first(
            &settings.hosts,
            settings.port,
            &client_id,
            Some(presence_will(&presence_topic)),
            keep_alive,
        )?;
        Session::open(transport, &presence_topic)
    });

    let (left, right) = source.profiles();
    info!("{}, left {}, right {}", topics.robot(), left, right);
    Ok(outcome?)
}
