//! In-process stand-in for a real device.
//!
//! Every call is recorded and succeeds unless it was scripted to fail, which
//! makes it usable both for dry runs of a session queue and for tests of the
//! scheduling engine.

use std::{collections::HashMap, sync::Mutex};

use astro_core::models::{CameraSettings, DeviceModel, SolarTarget};

use crate::device::{
	Camera, CameraSetting, ConnectionMode, DeviceConnector, DeviceError, DeviceResult, DeviceSessionClient, Outcome,
};

#[derive(Debug, Clone, Copy)]
enum Script {
	/// Answer `false` this many more times.
	Refuse(u32),
	/// Fail with a lost connection this many more times.
	Drop(u32),
}

#[derive(Debug, Default)]
struct CameraState {
	tele: CameraSettings,
	wide: CameraSettings,
}

pub struct SimulatedDevice {
	model: DeviceModel,
	calls: Mutex<Vec<String>>,
	scripts: Mutex<HashMap<&'static str, Script>>,
	camera: Mutex<CameraState>,
}

impl SimulatedDevice {
	pub fn new(model: DeviceModel) -> Self {
		Self {
			model,
			calls: Mutex::new(Vec::new()),
			scripts: Mutex::new(HashMap::new()),
			camera: Mutex::new(CameraState::default()),
		}
	}

	/// Make `op` answer `false` the next `times` calls (`u32::MAX` for always).
	pub fn refuse(self, op: &'static str, times: u32) -> Self {
		self.script(op, Script::Refuse(times))
	}

	/// Make `op` fail with a lost connection the next `times` calls.
	pub fn drop_connection(self, op: &'static str, times: u32) -> Self {
		self.script(op, Script::Drop(times))
	}

	fn script(self, op: &'static str, script: Script) -> Self {
		if let Ok(mut scripts) = self.scripts.lock() {
			scripts.insert(op, script);
		}
		self
	}

	/// Every call so far, as `op` or `op:detail`.
	pub fn calls(&self) -> Vec<String> {
		self.calls.lock().map(|c| c.clone()).unwrap_or_default()
	}

	/// Number of calls to `op`, whatever their detail.
	pub fn count(&self, op: &str) -> usize {
		self.calls()
			.iter()
			.filter(|c| c.split(':').next() == Some(op))
			.count()
	}

	fn reply(&self, op: &'static str, detail: String) -> DeviceResult {
		if let Ok(mut calls) = self.calls.lock() {
			calls.push(if detail.is_empty() { op.to_string() } else { format!("{op}:{detail}") });
		}
		tracing::debug!(op, %detail, "simulated device call");

		let mut scripts = match self.scripts.lock() {
			Ok(s) => s,
			Err(_) => return Ok(Outcome::Flag(true)),
		};
		match scripts.get_mut(op) {
			Some(Script::Refuse(n)) if *n > 0 => {
				if *n != u32::MAX {
					*n -= 1;
				}
				Ok(Outcome::Flag(false))
			}
			Some(Script::Drop(n)) if *n > 0 => {
				if *n != u32::MAX {
					*n -= 1;
				}
				Err(DeviceError::ConnectionLost(format!("simulated drop during {op}")))
			}
			_ => Ok(Outcome::Flag(true)),
		}
	}
}

impl DeviceSessionClient for SimulatedDevice {
	fn model(&self) -> DeviceModel {
		self.model
	}

	fn describe(&self) -> String {
		format!("{} (simulated)", self.model)
	}

	fn sync_time(&self) -> DeviceResult {
		self.reply("sync_time", String::new())
	}

	fn set_timezone(&self) -> DeviceResult {
		self.reply("set_timezone", String::new())
	}

	fn go_live(&self) -> DeviceResult {
		self.reply("go_live", String::new())
	}

	fn autofocus(&self, infinite: bool) -> DeviceResult {
		self.reply("autofocus", if infinite { "infinite".into() } else { "auto".into() })
	}

	fn polar_align(&self) -> DeviceResult {
		self.reply("polar_align", String::new())
	}

	fn calibrate(&self) -> DeviceResult {
		self.reply("calibrate", String::new())
	}

	fn stop_goto(&self) -> DeviceResult {
		self.reply("stop_goto", String::new())
	}

	fn goto_catalog(&self, target: SolarTarget) -> DeviceResult {
		self.reply("goto_catalog", format!("{}={}", target.catalog_id(), target.name()))
	}

	fn goto_coordinates(&self, ra: f64, dec: f64, name: &str) -> DeviceResult {
		self.reply("goto_coordinates", format!("{name}@{ra:.4},{dec:.4}"))
	}

	fn update_camera_setting(&self, setting: CameraSetting, value: &str) -> DeviceResult {
		let result = self.reply("update_camera_setting", format!("{}={value}", setting.field_name()))?;
		if result.succeeded() {
			if let Ok(mut state) = self.camera.lock() {
				let value = Some(value.to_string());
				match setting {
					CameraSetting::Exposure => state.tele.exposure = value,
					CameraSetting::Gain => state.tele.gain = value,
					CameraSetting::IrFilter => state.tele.ir_filter = value,
					CameraSetting::Binning => state.tele.binning = value,
					CameraSetting::Count => {
						let count = value.and_then(|v| v.parse().ok());
						state.tele.count = count;
						state.wide.count = count;
					}
					CameraSetting::WideExposure => state.wide.exposure = value,
					CameraSetting::WideGain => state.wide.gain = value,
				}
			}
		}
		Ok(result)
	}

	fn start_capture(&self, camera: Camera) -> DeviceResult {
		match camera {
			Camera::Tele => self.reply("start_capture", String::new()),
			Camera::Wide => self.reply("start_capture_wide", String::new()),
		}
	}

	fn wait_capture(&self, camera: Camera) -> DeviceResult {
		match camera {
			Camera::Tele => self.reply("wait_capture", String::new()),
			Camera::Wide => self.reply("wait_capture_wide", String::new()),
		}
	}

	fn read_camera_settings(&self, camera: Camera) -> Result<Option<CameraSettings>, DeviceError> {
		let outcome = self.reply("read_camera_settings", String::new())?;
		if !outcome.succeeded() {
			return Ok(None);
		}
		let state = match self.camera.lock() {
			Ok(s) => s,
			Err(_) => return Ok(None),
		};
		Ok(Some(match camera {
			Camera::Tele => state.tele.clone(),
			Camera::Wide => state.wide.clone(),
		}))
	}

	fn disconnect(&self) -> DeviceResult {
		self.reply("disconnect", String::new())
	}

	fn set_host_lock(&self, locked: bool) -> DeviceResult {
		self.reply("set_host_lock", locked.to_string())
	}

	fn motor_action(&self, action: u8) -> DeviceResult {
		self.reply("motor_action", action.to_string())
	}

	fn parse_ra(&self, text: &str) -> Option<f64> {
		parse_sexagesimal(text)
	}

	fn parse_dec(&self, text: &str) -> Option<f64> {
		parse_sexagesimal(text)
	}
}

/// `"5h35m17.3s"`, `"5:35:17.3"`, `"-5°23'28\""` and `"-5 23 28"` style values.
fn parse_sexagesimal(text: &str) -> Option<f64> {
	let text = text.trim();
	let negative = text.starts_with('-');
	let parts: Vec<f64> = text
		.trim_start_matches(['-', '+'])
		.split(|c: char| !(c.is_ascii_digit() || c == '.'))
		.filter(|p| !p.is_empty())
		.map(str::parse::<f64>)
		.collect::<Result<_, _>>()
		.ok()?;
	if parts.is_empty() || parts.len() > 3 {
		return None;
	}
	let value = parts.iter().zip([1.0, 60.0, 3600.0]).map(|(p, div)| p / div).sum::<f64>();
	Some(if negative { -value } else { value })
}

/// Connector that only logs; pairing and network joining happen elsewhere.
#[derive(Debug, Default)]
pub struct SimulatedConnector {
	refuse: bool,
}

impl SimulatedConnector {
	pub fn refusing() -> Self {
		Self { refuse: true }
	}
}

impl DeviceConnector for SimulatedConnector {
	fn connect(&self, mode: &ConnectionMode) -> Result<(), DeviceError> {
		if self.refuse {
			return Err(DeviceError::ConnectionLost("simulated connector refused".into()));
		}
		match mode {
			ConnectionMode::Pair => tracing::info!("simulated pairing complete"),
			ConnectionMode::Direct { ip } => tracing::info!(%ip, "simulated connection established"),
		}
		Ok(())
	}
}
