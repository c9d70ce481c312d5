pub mod device;
pub mod job;
mod lenient;
pub mod step;

pub use device::{CameraSettings, DeviceModel, DeviceSettings, SolarTarget};
pub use job::{Command, IdCommand, JobDocument, JobStatus, Process, Schedule, ScheduleError};
pub use step::{CameraSetup, Coordinate, GotoManual, GotoSolar, TimedStep};
