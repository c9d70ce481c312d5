use astro_core::models::{CameraSettings, DeviceModel, SolarTarget};
use thiserror::Error;

/// What a device call reported back.
///
/// Most calls answer with a flag. Some answer with a zero-based index, so
/// `Index(0)` is a legitimate success and must not be read as `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Flag(bool),
	Index(i64),
}

impl Outcome {
	pub fn succeeded(self) -> bool {
		match self {
			Outcome::Flag(ok) => ok,
			Outcome::Index(_) => true,
		}
	}
}

impl From<bool> for Outcome {
	fn from(ok: bool) -> Self {
		Outcome::Flag(ok)
	}
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
	#[error("connection lost: {0}")]
	ConnectionLost(String),

	#[error("timed out: {0}")]
	Timeout(String),

	#[error("protocol error: {0}")]
	Protocol(String),
}

impl DeviceError {
	pub fn is_connection_loss(&self) -> bool {
		matches!(self, DeviceError::ConnectionLost(_))
	}
}

pub type DeviceResult = Result<Outcome, DeviceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Camera {
	Tele,
	Wide,
}

/// Camera parameters the session can push to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraSetting {
	Exposure,
	Gain,
	IrFilter,
	Binning,
	Count,
	WideExposure,
	WideGain,
}

impl CameraSetting {
	/// Field name understood by the device client.
	pub fn field_name(self) -> &'static str {
		match self {
			CameraSetting::Exposure => "exposure",
			CameraSetting::Gain => "gain",
			CameraSetting::IrFilter => "IR",
			CameraSetting::Binning => "binning",
			CameraSetting::Count => "count",
			CameraSetting::WideExposure => "wide_exposure",
			CameraSetting::WideGain => "wide_gain",
		}
	}
}

/// Blocking operations the session runner drives. Each call either succeeds,
/// reports failure through its [`Outcome`], or fails at the transport level.
///
/// Implementations speak the device protocol; nothing in this crate does.
pub trait DeviceSessionClient: Send + Sync {
	fn model(&self) -> DeviceModel;

	/// Identity recorded into finished jobs.
	fn describe(&self) -> String {
		self.model().to_string()
	}

	fn sync_time(&self) -> DeviceResult;
	fn set_timezone(&self) -> DeviceResult;
	fn go_live(&self) -> DeviceResult;
	fn autofocus(&self, infinite: bool) -> DeviceResult;
	fn polar_align(&self) -> DeviceResult;
	fn calibrate(&self) -> DeviceResult;
	fn stop_goto(&self) -> DeviceResult;
	fn goto_catalog(&self, target: SolarTarget) -> DeviceResult;
	fn goto_coordinates(&self, ra: f64, dec: f64, name: &str) -> DeviceResult;
	fn update_camera_setting(&self, setting: CameraSetting, value: &str) -> DeviceResult;
	fn start_capture(&self, camera: Camera) -> DeviceResult;
	fn wait_capture(&self, camera: Camera) -> DeviceResult;
	fn read_camera_settings(&self, camera: Camera) -> Result<Option<CameraSettings>, DeviceError>;
	fn disconnect(&self) -> DeviceResult;
	fn set_host_lock(&self, locked: bool) -> DeviceResult;
	fn motor_action(&self, action: u8) -> DeviceResult;

	/// Sexagesimal right ascension (`"5h35m17s"`, `"5:35:17"`) to decimal.
	fn parse_ra(&self, text: &str) -> Option<f64>;
	/// Sexagesimal declination (`"-5°23'28\""`, `"-5:23:28"`) to decimal.
	fn parse_dec(&self, text: &str) -> Option<f64>;
}

/// How to reach the device before a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionMode {
	/// Interactive pairing and credential provisioning first.
	Pair,
	Direct { ip: String },
}

/// Establishes the link itself (pairing or joining the device network).
pub trait DeviceConnector: Send + Sync {
	fn connect(&self, mode: &ConnectionMode) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn index_results_count_as_success() {
		assert!(Outcome::Index(0).succeeded());
		assert!(Outcome::Index(3).succeeded());
		assert!(Outcome::Flag(true).succeeded());
		assert!(!Outcome::Flag(false).succeeded());
		assert_eq!(Outcome::from(false), Outcome::Flag(false));
	}

	#[test]
	fn connection_loss_classification() {
		assert!(DeviceError::ConnectionLost("ws closed".into()).is_connection_loss());
		assert!(!DeviceError::Timeout("wait".into()).is_connection_loss());
	}

	#[test]
	fn setting_field_names() {
		assert_eq!(CameraSetting::IrFilter.field_name(), "IR");
		assert_eq!(CameraSetting::WideGain.field_name(), "wide_gain");
	}
}
