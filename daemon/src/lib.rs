//! Session execution: device capability traits, the per-job session runner,
//! retries, and the single-worker scheduling loop.

pub mod actions;
pub mod connection;
pub mod device;
pub mod engine;
pub mod simulator;

pub use connection::{DeviceLink, LinkError};
pub use device::{ConnectionMode, DeviceConnector, DeviceError, DeviceSessionClient, Outcome};
