use rppal::gpio::{Gpio, OutputPin};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use teleop::{DUTY_RANGE, DriveCommand};

/// Duty value of a released channel.
pub const NEUTRAL_DUTY: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wheel {
    Left,
    Right,
}

impl fmt::Display for Wheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wheel::Left => write!(f, "left"),
            Wheel::Right => write!(f, "right"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("duty cycle {0} is not a percentage")]
    InvalidDuty(f64),
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),
    #[error("{0} wheel worker is gone")]
    WorkerGone(Wheel),
    #[error("cannot start wheel worker: {0}")]
    Spawn(std::io::Error),
    #[error("output failure: {0}")]
    Output(String),
}

/// Hardware side of one channel.
pub trait PwmOutput: Send {
    /// `fraction` of the period the signal is high, in [0, 1].
    fn write(&mut self, fraction: f64) -> Result<(), ActuatorError>;

    /// Stops the signal and leaves the pin in a safe state.
    fn release(&mut self) -> Result<(), ActuatorError>;
}

pub struct GpioPwm {
    pin: OutputPin,
    frequency: f64,
}

impl GpioPwm {
    pub fn new(gpio: &Gpio, pin: u8, frequency: f64) -> Result<Self, ActuatorError> {
        let mut pin = gpio.get(pin)?.into_output();
        pin.set_reset_on_drop(true);
        pin.set_pwm_frequency(frequency, 0.0)?;
        Ok(GpioPwm { pin, frequency })
    }
}

impl PwmOutput for GpioPwm {
    fn write(&mut self, fraction: f64) -> Result<(), ActuatorError> {
        self.pin.set_pwm_frequency(self.frequency, fraction)?;
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        self.pin.clear_pwm()?;
        self.pin.set_low();
        Ok(())
    }
}

/// Logs what would be written, for running away from the robot.
pub struct DryRunPwm {
    pin: u8,
}

impl DryRunPwm {
    pub fn new(pin: u8) -> Self {
        DryRunPwm { pin }
    }
}

impl PwmOutput for DryRunPwm {
    fn write(&mut self, fraction: f64) -> Result<(), ActuatorError> {
        info!("GPIO {} duty {}", self.pin, fraction);
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        info!("GPIO {} released", self.pin);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelState {
    pub wheel: Wheel,
    pub duty_cycle: f64,
    pub enabled: bool,
}

pub struct ActuatorChannel {
    state: ChannelState,
    output: Box<dyn PwmOutput>,
}

impl ActuatorChannel {
    pub fn new(wheel: Wheel, output: Box<dyn PwmOutput>) -> Self {
        ActuatorChannel {
            state: ChannelState {
                wheel,
                duty_cycle: NEUTRAL_DUTY,
                enabled: false,
            },
            output,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// `percent` of the period, converted to the output's [0, 1] range. The
    /// recorded state only changes once the hardware accepted the value.
    pub fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        if !percent.is_finite() || !DUTY_RANGE.contains(&percent) {
            return Err(ActuatorError::InvalidDuty(percent));
        }
        self.output.write(percent / 100.0)?;
        self.state.duty_cycle = percent;
        self.state.enabled = true;
        debug!("{} duty {}", self.state.wheel, percent);
        Ok(())
    }

    /// Resets to neutral and disabled whatever the output reports.
    pub fn release(&mut self) -> Result<(), ActuatorError> {
        self.state.duty_cycle = NEUTRAL_DUTY;
        self.state.enabled = false;
        self.output.release()
    }
}

enum Job {
    Duty(f64, Sender<Result<(), ActuatorError>>),
    Release(Sender<Result<(), ActuatorError>>),
    State(Sender<ChannelState>),
}

/// Thread owning one channel. Jobs run in submission order.
struct Worker {
    wheel: Wheel,
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

fn run(mut channel: ActuatorChannel, jobs: Receiver<Job>) {
    // a dropped reply receiver only means the caller stopped waiting
    for job in jobs {
        match job {
            Job::Duty(percent, ack) => {
                let _ = ack.send(channel.set_duty_cycle(percent));
            }
            Job::Release(ack) => {
                let _ = ack.send(channel.release());
            }
            Job::State(ack) => {
                let _ = ack.send(channel.state());
            }
        }
    }
    debug!("{} worker stopped", channel.state().wheel);
}

impl Worker {
    fn spawn(channel: ActuatorChannel) -> Result<Self, ActuatorError> {
        let wheel = channel.state().wheel;
        let (jobs, queue) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(format!("{}-wheel", wheel))
            .spawn(move || run(channel, queue))
            .map_err(ActuatorError::Spawn)?;
        Ok(Worker {
            wheel,
            jobs: Some(jobs),
            handle: Some(handle),
        })
    }

    fn submit<R>(&self, job: impl FnOnce(Sender<R>) -> Job) -> Result<Receiver<R>, ActuatorError> {
        let jobs = self.jobs.as_ref().ok_or(ActuatorError::WorkerGone(self.wheel))?;
        let (ack, reply) = mpsc::channel();
        jobs.send(job(ack)).map_err(|_| ActuatorError::WorkerGone(self.wheel))?;
        Ok(reply)
    }

    fn wait<R>(&self, reply: Result<Receiver<R>, ActuatorError>) -> Result<R, ActuatorError> {
        reply?.recv().map_err(|_| ActuatorError::WorkerGone(self.wheel))
    }

    /// A dead worker took its channel down with it, which leaves the pin reset.
    fn state(&self) -> ChannelState {
        self.wait(self.submit(Job::State)).unwrap_or(ChannelState {
            wheel: self.wheel,
            duty_cycle: NEUTRAL_DUTY,
            enabled: false,
        })
    }

    fn stop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("{} worker had panicked", self.wheel);
            }
        }
    }
}

/// Owns both wheel channels, each driven by its own long-lived thread.
pub struct Actuator {
    left: Worker,
    right: Worker,
}

impl Actuator {
    pub fn new(left: ActuatorChannel, right: ActuatorChannel) -> Result<Self, ActuatorError> {
        Ok(Actuator {
            left: Worker::spawn(left)?,
            right: Worker::spawn(right)?,
        })
    }

    pub fn states(&self) -> (ChannelState, ChannelState) {
        (self.left.state(), self.right.state())
    }

    /// Hands each wheel its duty and returns once both workers acknowledged.
    /// Failures are logged per wheel; a failed write is not retried.
    pub fn apply(&self, command: &DriveCommand) -> (Result<(), ActuatorError>, Result<(), ActuatorError>) {
        let left = self.left.submit(|ack| Job::Duty(command.left, ack));
        let right = self.right.submit(|ack| Job::Duty(command.right, ack));
        let left = self.left.wait(left).and_then(|res| res);
        let right = self.right.wait(right).and_then(|res| res);

        if let Err(err) = &left {
            error!("left wheel: {}", err);
        }
        if let Err(err) = &right {
            error!("right wheel: {}", err);
        }
        (left, right)
    }

    /// Releases every channel. Both are attempted; safe to call repeatedly.
    pub fn release(&self) -> Result<(), ActuatorError> {
        let left = self.left.submit(Job::Release);
        let right = self.right.submit(Job::Release);
        let left = self.left.wait(left).and_then(|res| res);
        let right = self.right.wait(right).and_then(|res| res);
        for res in [&left, &right] {
            if let Err(err) = res {
                warn!("release failed: {}", err);
            }
        }
        left.and(right)
    }
}

impl Drop for Actuator {
    fn drop(&mut self) {
        let _ = self.release();
        self.left.stop();
        self.right.stop();
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread::ThreadId;

    #[derive(Default)]
    pub struct Recorded {
        pub writes: Vec<f64>,
        pub releases: u32,
        pub failing: bool,
        pub panicking: bool,
        pub threads: Vec<ThreadId>,
    }

    /// Output that records calls and can be told to fail.
    pub struct RecordingPwm(pub Arc<Mutex<Recorded>>);

    impl PwmOutput for RecordingPwm {
        fn write(&mut self, fraction: f64) -> Result<(), ActuatorError> {
            let mut rec = self.0.lock().unwrap();
            rec.threads.push(thread::current().id());
            if rec.panicking {
                drop(rec);
                panic!("PWM bus fault");
            }
            if rec.failing {
                return Err(ActuatorError::Output("write refused".into()));
            }
            rec.writes.push(fraction);
            Ok(())
        }

        fn release(&mut self) -> Result<(), ActuatorError> {
            let mut rec = self.0.lock().unwrap();
            rec.releases += 1;
            if rec.failing {
                return Err(ActuatorError::Output("release refused".into()));
            }
            Ok(())
        }
    }

    pub fn recording_actuator() -> (Actuator, Arc<Mutex<Recorded>>, Arc<Mutex<Recorded>>) {
        let left = Arc::new(Mutex::new(Recorded::default()));
        let right = Arc::new(Mutex::new(Recorded::default()));
        let actuator = Actuator::new(
            ActuatorChannel::new(Wheel::Left, Box::new(RecordingPwm(Arc::clone(&left)))),
            ActuatorChannel::new(Wheel::Right, Box::new(RecordingPwm(Arc::clone(&right)))),
        )
        .unwrap();
        (actuator, left, right)
    }

    #[test]
    fn percent_is_written_as_fraction() {
        let (actuator, left, right) = recording_actuator();
        let (l, r) = actuator.apply(&DriveCommand::new(12.0, 2.5));
        assert!(l.is_ok() && r.is_ok());

        assert_eq!(left.lock().unwrap().writes, vec![0.12]);
        assert_eq!(right.lock().unwrap().writes, vec![0.025]);

        let (ls, rs) = actuator.states();
        assert_eq!((ls.duty_cycle, ls.enabled), (12.0, true));
        assert_eq!((rs.duty_cycle, rs.enabled), (2.5, true));
    }

    #[test]
    fn invalid_duty_is_rejected_without_touching_state() {
        let (actuator, left, _right) = recording_actuator();
        actuator.apply(&DriveCommand::new(8.0, 8.0));

        let (l, r) = actuator.apply(&DriveCommand::new(f64::NAN, 9.0));
        assert!(matches!(l, Err(ActuatorError::InvalidDuty(_))));
        assert!(r.is_ok());
        let (l, _) = actuator.apply(&DriveCommand::new(-1.0, 9.0));
        assert!(matches!(l, Err(ActuatorError::InvalidDuty(_))));
        let (l, _) = actuator.apply(&DriveCommand::new(100.5, 9.0));
        assert!(matches!(l, Err(ActuatorError::InvalidDuty(_))));

        assert_eq!(actuator.states().0.duty_cycle, 8.0);
        assert_eq!(left.lock().unwrap().writes.len(), 1);
    }

    #[test]
    fn one_failing_wheel_does_not_block_the_other() {
        let (actuator, left, right) = recording_actuator();
        left.lock().unwrap().failing = true;

        let (l, r) = actuator.apply(&DriveCommand::new(7.0, 7.5));
        assert!(l.is_err());
        assert!(r.is_ok());
        assert_eq!(right.lock().unwrap().writes, vec![0.075]);

        let (ls, rs) = actuator.states();
        assert!(!ls.enabled);
        assert_eq!(rs.duty_cycle, 7.5);
    }

    #[test]
    fn release_is_idempotent_and_resets_state() {
        let (actuator, left, right) = recording_actuator();
        actuator.apply(&DriveCommand::new(9.0, 9.0));

        assert!(actuator.release().is_ok());
        assert!(actuator.release().is_ok());

        let (ls, rs) = actuator.states();
        assert_eq!((ls.duty_cycle, ls.enabled), (NEUTRAL_DUTY, false));
        assert_eq!((rs.duty_cycle, rs.enabled), (NEUTRAL_DUTY, false));
        assert_eq!(left.lock().unwrap().releases, 2);
        assert_eq!(right.lock().unwrap().releases, 2);
    }

    #[test]
    fn release_attempts_every_channel_and_resets_even_on_failure() {
        let (actuator, left, right) = recording_actuator();
        actuator.apply(&DriveCommand::new(9.0, 9.0));
        left.lock().unwrap().failing = true;

        assert!(actuator.release().is_err());
        assert_eq!(right.lock().unwrap().releases, 1);
        assert!(!actuator.states().0.enabled);
        assert_eq!(actuator.states().0.duty_cycle, NEUTRAL_DUTY);
    }

    #[test]
    fn dropping_the_actuator_releases_channels() {
        let (actuator, left, right) = recording_actuator();
        drop(actuator);
        assert_eq!(left.lock().unwrap().releases, 1);
        assert_eq!(right.lock().unwrap().releases, 1);
    }

    #[test]
    fn each_wheel_keeps_its_own_worker_thread() {
        let (actuator, left, right) = recording_actuator();
        for duty in [7.0, 7.5, 8.0] {
            let (l, r) = actuator.apply(&DriveCommand::new(duty, duty));
            assert!(l.is_ok() && r.is_ok());
        }

        let left_threads = left.lock().unwrap().threads.clone();
        let right_threads = right.lock().unwrap().threads.clone();
        assert_eq!(left_threads.len(), 3);
        assert_eq!(right_threads.len(), 3);
        assert!(left_threads.iter().all(|id| *id == left_threads[0]));
        assert!(right_threads.iter().all(|id| *id == right_threads[0]));
        assert_ne!(left_threads[0], right_threads[0]);
        assert_ne!(left_threads[0], thread::current().id());
        assert_ne!(right_threads[0], thread::current().id());
    }

    #[test]
    fn panicked_worker_is_reported_and_the_other_wheel_keeps_working() {
        let (actuator, left, right) = recording_actuator();
        left.lock().unwrap().panicking = true;

        let (l, r) = actuator.apply(&DriveCommand::new(7.0, 7.5));
        assert!(matches!(l, Err(ActuatorError::WorkerGone(Wheel::Left))));
        assert!(r.is_ok());

        let (l, r) = actuator.apply(&DriveCommand::new(7.0, 8.0));
        assert!(matches!(l, Err(ActuatorError::WorkerGone(Wheel::Left))));
        assert!(r.is_ok());
        assert_eq!(right.lock().unwrap().writes, vec![0.075, 0.08]);

        let (ls, rs) = actuator.states();
        assert_eq!((ls.duty_cycle, ls.enabled), (NEUTRAL_DUTY, false));
        assert_eq!(rs.duty_cycle, 8.0);
        assert!(matches!(actuator.release(), Err(ActuatorError::WorkerGone(Wheel::Left))));
    }
}
