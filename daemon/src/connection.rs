use std::{sync::Arc, thread, time::Duration};

use thiserror::Error;

use crate::device::{ConnectionMode, DeviceConnector, DeviceError, DeviceResult, DeviceSessionClient};

pub const DEFAULT_LINK_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum LinkError {
	#[error("could not reach the device after {attempts} attempt(s): {reason}")]
	Exhausted { attempts: u32, reason: String },
}

/// Everything needed to (re-)establish the device link: connect, then set the
/// device clock and timezone.
pub struct DeviceLink {
	connector: Arc<dyn DeviceConnector>,
	device: Arc<dyn DeviceSessionClient>,
	mode: ConnectionMode,
	attempts: u32,
	pause: Duration,
}

impl DeviceLink {
	pub fn new(connector: Arc<dyn DeviceConnector>, device: Arc<dyn DeviceSessionClient>, mode: ConnectionMode) -> Self {
		Self {
			connector,
			device,
			mode,
			attempts: DEFAULT_LINK_ATTEMPTS,
			pause: Duration::ZERO,
		}
	}

	pub fn with_attempts(mut self, attempts: u32) -> Self {
		self.attempts = attempts.max(1);
		self
	}

	/// Delay between failed attempts.
	pub fn with_pause(mut self, pause: Duration) -> Self {
		self.pause = pause;
		self
	}

	pub fn mode(&self) -> &ConnectionMode {
		&self.mode
	}

	/// Blocking. Run on a blocking thread from async code.
	pub fn establish(&self) -> Result<(), LinkError> {
		let mut reason = String::new();

		for attempt in 1..=self.attempts {
			match self.try_once() {
				Ok(()) => {
					tracing::info!(attempt, mode = ?self.mode, "device link established");
					return Ok(());
				}
				Err(e) => {
					tracing::warn!(attempt, error = %e, "device link attempt failed");
					reason = e;
				}
			}
			if attempt < self.attempts && !self.pause.is_zero() {
				thread::sleep(self.pause);
			}
		}

		Err(LinkError::Exhausted { attempts: self.attempts, reason })
	}

	fn try_once(&self) -> Result<(), String> {
		self.connector.connect(&self.mode).map_err(|e| e.to_string())?;
		expect_success("time sync", self.device.sync_time())?;
		expect_success("timezone", self.device.set_timezone())?;
		Ok(())
	}

	/// Best effort; failures are only logged.
	pub fn disconnect(&self) {
		match self.device.disconnect() {
			Ok(outcome) if outcome.succeeded() => tracing::info!("device disconnected"),
			Ok(_) => tracing::warn!("device refused to disconnect"),
			Err(e) => tracing::warn!(error = %e, "disconnect failed"),
		}
	}
}

fn expect_success(what: &str, result: DeviceResult) -> Result<(), String> {
	match result {
		Ok(outcome) if outcome.succeeded() => Ok(()),
		Ok(_) => Err(format!("{what} refused by device")),
		Err(DeviceError::ConnectionLost(msg)) => Err(format!("{what}: connection lost: {msg}")),
		Err(e) => Err(format!("{what}: {e}")),
	}
}
