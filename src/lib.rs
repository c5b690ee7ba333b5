//! Shared core of the teleoperation pipeline: the drive command wire format,
//! the topic namespace of a robot, the publish/subscribe transport and the
//! presence session both processes run on top of it.

pub mod drive;
pub mod logging;
pub mod session;
pub mod shutdown;
pub mod topics;
pub mod transport;

pub use drive::{DUTY_RANGE, DriveCommand, PayloadError};
pub use session::{Session, presence_will};
pub use shutdown::Shutdown;
pub use topics::Topics;
