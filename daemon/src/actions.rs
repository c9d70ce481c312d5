//! One-off device maintenance, outside the job queue.

use std::{thread, time::Duration};

use astro_core::models::DeviceModel;
use thiserror::Error;

use crate::device::{DeviceError, DeviceResult, DeviceSessionClient};

pub const DEFAULT_ACTION_ATTEMPTS: u32 = 3;
pub const DEFAULT_ACTION_PAUSE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ActionError {
	#[error("{action} failed after {attempts} attempt(s)")]
	Failed { action: &'static str, attempts: u32 },

	#[error(transparent)]
	Device(#[from] DeviceError),
}

fn attempt<F>(action: &'static str, attempts: u32, pause: Duration, mut call: F) -> Result<u32, ActionError>
where
	F: FnMut() -> Result<bool, DeviceError>,
{
	let attempts = attempts.max(1);
	for n in 1..=attempts {
		if call()? {
			tracing::info!(action, attempt = n, "action succeeded");
			return Ok(n);
		}
		tracing::warn!(action, attempt = n, "action refused by device");
		if n < attempts && !pause.is_zero() {
			thread::sleep(pause);
		}
	}
	Err(ActionError::Failed { action, attempts })
}

/// Take (`lock = true`) or release host mode. Returns the attempt that worked.
pub fn toggle_host_lock(
	device: &dyn DeviceSessionClient,
	lock: bool,
	attempts: u32,
	pause: Duration,
) -> Result<u32, ActionError> {
	let action = if lock { "host lock" } else { "host unlock" };
	attempt(action, attempts, pause, || Ok(device.set_host_lock(lock)?.succeeded()))
}

/// Stop any goto, then polar-align until the device accepts it.
pub fn eq_solve(device: &dyn DeviceSessionClient, attempts: u32, pause: Duration) -> Result<u32, ActionError> {
	if !device.stop_goto()?.succeeded() {
		tracing::warn!("stop goto refused, trying EQ solving anyway");
	}
	attempt("EQ solving", attempts, pause, || Ok(device.polar_align()?.succeeded()))
}

/// Motor actions that park the mount in polar-alignment position.
pub fn polar_motor_sequence(model: DeviceModel) -> [u8; 4] {
	match model {
		DeviceModel::Dwarf3 => [5, 6, 9, 7],
		DeviceModel::Dwarf2 => [5, 6, 2, 3],
	}
}

pub fn polar_position(device: &dyn DeviceSessionClient, pause: Duration) -> Result<(), ActionError> {
	for id in polar_motor_sequence(device.model()) {
		once("polar position", device.motor_action(id))?;
		tracing::info!(motor_action = id, "motor action done");
		if !pause.is_zero() {
			thread::sleep(pause);
		}
	}
	Ok(())
}

/// Standalone calibration: sync clock, resume live view, stop goto, calibrate.
pub fn calibrate(device: &dyn DeviceSessionClient, settle: Duration) -> Result<(), ActionError> {
	once("time sync", device.sync_time())?;
	once("go live", device.go_live())?;
	once("stop goto", device.stop_goto())?;
	thread::sleep(settle);
	once("calibration", device.calibrate())?;
	tracing::info!("calibration done");
	Ok(())
}

fn once(action: &'static str, result: DeviceResult) -> Result<(), ActionError> {
	if result?.succeeded() {
		Ok(())
	} else {
		Err(ActionError::Failed { action, attempts: 1 })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::simulator::SimulatedDevice;

	#[test]
	fn host_lock_retries_then_succeeds() {
		let device = SimulatedDevice::new(DeviceModel::Dwarf2).refuse("set_host_lock", 2);
		let used = toggle_host_lock(&device, true, 3, Duration::ZERO).unwrap();
		assert_eq!(used, 3);
		assert_eq!(device.calls(), vec!["set_host_lock:true"; 3]);
	}

	#[test]
	fn host_unlock_gives_up() {
		let device = SimulatedDevice::new(DeviceModel::Dwarf2).refuse("set_host_lock", u32::MAX);
		let err = toggle_host_lock(&device, false, 3, Duration::ZERO).unwrap_err();
		assert!(matches!(err, ActionError::Failed { attempts: 3, .. }));
	}

	#[test]
	fn eq_solve_stops_goto_first() {
		let device = SimulatedDevice::new(DeviceModel::Dwarf2).refuse("polar_align", 1);
		assert_eq!(eq_solve(&device, 3, Duration::ZERO).unwrap(), 2);
		assert_eq!(device.calls(), vec!["stop_goto", "polar_align", "polar_align"]);
	}

	#[test]
	fn polar_position_depends_on_model() {
		let dwarf3 = SimulatedDevice::new(DeviceModel::Dwarf3);
		polar_position(&dwarf3, Duration::ZERO).unwrap();
		assert_eq!(
			dwarf3.calls(),
			vec!["motor_action:5", "motor_action:6", "motor_action:9", "motor_action:7"]
		);

		let dwarf2 = SimulatedDevice::new(DeviceModel::Dwarf2);
		polar_position(&dwarf2, Duration::ZERO).unwrap();
		assert_eq!(
			dwarf2.calls(),
			vec!["motor_action:5", "motor_action:6", "motor_action:2", "motor_action:3"]
		);
	}

	#[test]
	fn calibrate_sequence_and_failure() {
		let device = SimulatedDevice::new(DeviceModel::Dwarf2);
		calibrate(&device, Duration::ZERO).unwrap();
		assert_eq!(device.calls(), vec!["sync_time", "go_live", "stop_goto", "calibrate"]);

		let device = SimulatedDevice::new(DeviceModel::Dwarf2).refuse("go_live", 1);
		let err = calibrate(&device, Duration::ZERO).unwrap_err();
		assert_eq!(err.to_string(), "go live failed after 1 attempt(s)");
	}

	#[test]
	fn lost_connection_propagates() {
		let device = SimulatedDevice::new(DeviceModel::Dwarf2).drop_connection("motor_action", 1);
		let err = polar_position(&device, Duration::ZERO).unwrap_err();
		assert!(matches!(err, ActionError::Device(DeviceError::ConnectionLost(_))));
	}
}
