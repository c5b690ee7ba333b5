use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use teleop::transport::{Transport, TransportError};
use teleop::{Session, Shutdown, Topics};

use crate::joystick::{InputError, InputSource};
use crate::publisher::Publisher;
use crate::source::{CommandSource, TickError};

enum Ended {
    Interrupted,
    InputLost(InputError),
    LinkLost(TransportError),
}

/// Pacing of the operating loop.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub tick: Duration,
    pub reconnect: Duration,
}

/// Drives the robot until shutdown or until the input device goes away.
///
/// A lost broker link drops the session, which lets the broker publish the
/// controller's will, then `connect` is retried every `reconnect`. Each new
/// session gets a fresh publisher, so the current command is sent again.
pub fn operate<T, I, C>(
    source: &mut CommandSource<I>,
    topics: &Topics,
    shutdown: &Shutdown,
    timing: Timing,
    mut connect: C,
) -> Result<(), InputError>
where
    T: Transport,
    I: InputSource,
    C: FnMut() -> Result<Session<T>, TransportError>,
{
    while !shutdown.is_triggered() {
        let mut session = match connect() {
            Ok(session) => session,
            Err(err) => {
                error!("connection error: {}", err);
                shutdown.sleep(timing.reconnect);
                continue;
            }
        };

        let outcome = match serve(source, &mut session, topics, shutdown, timing.tick) {
            Ended::Interrupted => Ok(()),
            Ended::InputLost(err) => Err(err),
            Ended::LinkLost(err) => {
                error!("broker link lost: {}", err);
                drop(session);
                shutdown.sleep(timing.reconnect);
                continue;
            }
        };

        if let Err(err) = session.close() {
            warn!("session close incomplete: {}", err);
        }
        return outcome;
    }

    info!("interrupted while disconnected");
    Ok(())
}

fn serve<T: Transport, I: InputSource>(
    source: &mut CommandSource<I>,
    session: &mut Session<T>,
    topics: &Topics,
    shutdown: &Shutdown,
    tick: Duration,
) -> Ended {
    let mut publisher = Publisher::new(session, topics.clone());

    let ended = loop {
        if shutdown.is_triggered() {
            info!("operator interrupt, stopping");
            break Ended::Interrupted;
        }
        match source.tick(&mut publisher) {
            Ok(_) => {}
            Err(TickError::Input(err)) => {
                error!("input device lost: {}", err);
                break Ended::InputLost(err);
            }
            Err(TickError::Transport(err)) => return Ended::LinkLost(err),
        }
        if let Err(err) = publisher.service() {
            return Ended::LinkLost(err);
        }
        thread::sleep(tick);
    };

    if let Err(err) = publisher.force_drive(&source.neutral()) {
        warn!("could not send neutral command: {}", err);
    }
    ended
}
