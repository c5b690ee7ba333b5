mod actuator;
mod agent;
mod config;
mod sink;

use actuator::{Actuator, ActuatorChannel, DryRunPwm, GpioPwm, PwmOutput, Wheel};
use agent::Agent;
use config::{OutputKind, RobotSettings};

use anyhow::{Context, Result};
use rppal::gpio::Gpio;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use teleop::transport::{Transport, connect_first};
use teleop::{Session, Shutdown, Topics, logging, presence_will};

const SETTINGS_PATH: &str = "robot.json";

fn build_actuator(settings: &RobotSettings) -> Result<Actuator> {
    let (left, right): (Box<dyn PwmOutput>, Box<dyn PwmOutput>) = match settings.output {
        OutputKind::Gpio => {
            let gpio = Gpio::new()?;
            (
                Box::new(GpioPwm::new(&gpio, settings.left_pin, settings.pwm_frequency)?),
                Box::new(GpioPwm::new(&gpio, settings.right_pin, settings.pwm_frequency)?),
            )
        }
        OutputKind::DryRun => (
            Box::new(DryRunPwm::new(settings.left_pin)),
            Box::new(DryRunPwm::new(settings.right_pin)),
        ),
    };
    info!(
        "left wheel on GPIO {}, right wheel on GPIO {}, {} Hz",
        settings.left_pin, settings.right_pin, settings.pwm_frequency
    );
    Ok(Actuator::new(
        ActuatorChannel::new(Wheel::Left, left),
        ActuatorChannel::new(Wheel::Right, right),
    )?)
}

/// Exit path once a signal arrived. Both steps are always attempted.
fn release_all<T: Transport>(session: &mut Session<T>, actuator: &Actuator) {
    if let Err(err) = session.close() {
        warn!("session close incomplete: {}", err);
    }
    if actuator.release().is_ok() {
        info!("wheels released");
    }
}

fn main() -> Result<()> {
    let path = env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(SETTINGS_PATH));
    let settings = RobotSettings::load_or_create(&path)?;
    logging::init(settings.log_level);

    let robot = settings.validate().context("refusing to start")?;
    let actuator = build_actuator(&settings)?;
    let shutdown = Shutdown::install().context("cannot install signal handler")?;

    let topics = Topics::new(&robot);
    let agent = Agent::new(topics.clone(), &actuator, settings.release_on_controller_loss);
    let reconnect = Duration::from_secs(settings.reconnect_secs);

    while !shutdown.is_triggered() {
        info!("robot {} connecting to {:?}", robot, settings.hosts);
        let transport = match connect_first(
            &settings.hosts,
            settings.port,
            &robot,
            Some(presence_will(&topics.connection())),
            Duration::from_secs(settings.keep_alive_secs),
        ) {
            Ok(transport) => transport,
            Err(err) => {
                error!("connection error: {}", err);
                shutdown.sleep(reconnect);
                continue;
            }
        };

        let mut session = match Session::open(transport, &topics.connection()) {
            Ok(session) => session,
            Err(err) => {
                error!("could not announce presence: {}", err);
                shutdown.sleep(reconnect);
                continue;
            }
        };

        match agent.attach(&mut session).and_then(|_| agent.serve(&mut session, &shutdown)) {
            Ok(()) => {
                release_all(&mut session, &actuator);
                return Ok(());
            }
            Err(err) => {
                // the dropped socket lets the broker publish our will
                error!("link lost: {}", err);
                let _ = actuator.release();
                drop(session);
                shutdown.sleep(reconnect);
            }
        }
    }

    // interrupted while disconnected
    if actuator.release().is_ok() {
        info!("wheels released");
    }
    Ok(())
}
