//! One pipeline attempt for one job.
//!
//! Stages run in a fixed order and stop at the first failure. Nothing here
//! retries a whole pipeline; that is the retry executor's job. The runner only
//! repeats the two stages known to fail spuriously (time sync and capture
//! polling).

use std::{fmt, thread, time::Duration};

use astro_core::models::{
	CameraSettings, CameraSetup, Command, Coordinate, DeviceModel, DeviceSettings, SolarTarget, TimedStep,
};
use thiserror::Error;

use crate::device::{Camera, CameraSetting, DeviceError, DeviceResult, DeviceSessionClient};

const INIT_TRIES: u32 = 3;
const CAPTURE_WAIT_TRIES: u32 = 5;

const CALIBRATION_EXPOSURE: &str = "1";
const CALIBRATION_GAIN: &str = "80";
const CALIBRATION_IR: &str = "1";
const CALIBRATION_BINNING: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	Init,
	GoLive,
	Autofocus,
	InfiniteFocus,
	EqSolving,
	Calibration,
	GotoSolar,
	GotoManual,
	SetupCamera,
	Capture,
	WaitCapture,
	SetupWideCamera,
	CaptureWide,
	WaitCaptureWide,
	Complete,
}

impl Stage {
	pub fn describe(self) -> &'static str {
		match self {
			Stage::Init => "initialization",
			Stage::GoLive => "go live",
			Stage::Autofocus => "autofocus",
			Stage::InfiniteFocus => "infinite focus",
			Stage::EqSolving => "EQ solving",
			Stage::Calibration => "calibration",
			Stage::GotoSolar => "goto solar",
			Stage::GotoManual => "goto manual",
			Stage::SetupCamera => "camera setup",
			Stage::Capture => "capture",
			Stage::WaitCapture => "capture wait",
			Stage::SetupWideCamera => "wide camera setup",
			Stage::CaptureWide => "wide capture",
			Stage::WaitCaptureWide => "wide capture wait",
			Stage::Complete => "complete",
		}
	}
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.describe())
	}
}

#[derive(Debug, Error)]
pub enum SessionError {
	#[error("action failed at step {stage}: {reason}")]
	Stage { stage: Stage, reason: String },

	#[error("device error at step {stage}: {source}")]
	Device {
		stage: Stage,
		#[source]
		source: DeviceError,
	},

	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("interrupted by user")]
	Interrupted,

	#[error("session worker stopped unexpectedly: {0}")]
	Internal(String),
}

impl SessionError {
	/// Stage and device failures are worth another full attempt. A broken job
	/// description or a user stop is not.
	pub fn is_retryable(&self) -> bool {
		matches!(self, SessionError::Stage { .. } | SessionError::Device { .. })
	}

	pub fn is_connection_loss(&self) -> bool {
		matches!(self, SessionError::Device { source, .. } if source.is_connection_loss())
	}

	pub fn stage(&self) -> Option<Stage> {
		match self {
			SessionError::Stage { stage, .. } | SessionError::Device { stage, .. } => Some(*stage),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
enum Goto {
	Solar {
		target: SolarTarget,
		wait_after: u64,
	},
	Manual {
		name: String,
		ra: f64,
		dec: f64,
		wait_after: u64,
	},
}

/// The stages a command asks for, validated before any device call.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
	autofocus: Option<TimedStep>,
	infinite_focus: Option<TimedStep>,
	eq_solving: Option<TimedStep>,
	calibration: Option<TimedStep>,
	goto: Option<Goto>,
	camera: Option<CameraSetup>,
	wide_camera: Option<CameraSetup>,
}

impl SessionPlan {
	pub fn build(command: &Command, device: &dyn DeviceSessionClient) -> Result<Self, SessionError> {
		let enabled = |step: &Option<TimedStep>| step.as_ref().filter(|s| s.do_action).cloned();
		let imaging = |setup: &Option<CameraSetup>| {
			setup
				.as_ref()
				.filter(|s| s.is_active() && s.has_settings())
				.cloned()
		};

		let solar = command.goto_solar.as_ref().filter(|g| g.do_action);
		let manual = command.goto_manual.as_ref().filter(|g| g.do_action);

		let goto = match (solar, manual) {
			(Some(_), Some(_)) => {
				return Err(SessionError::Configuration(
					"goto_solar and goto_manual are both enabled".to_string(),
				))
			}
			(Some(solar), None) => {
				let name = solar
					.target
					.as_deref()
					.map(str::trim)
					.filter(|t| !t.is_empty())
					.ok_or_else(|| SessionError::Configuration("goto_solar requires a target".to_string()))?;
				let target = SolarTarget::from_name(name)
					.ok_or_else(|| SessionError::Configuration(format!("unknown solar target '{name}'")))?;
				Some(Goto::Solar { target, wait_after: solar.wait_after })
			}
			(None, Some(manual)) => {
				let name = manual
					.target
					.as_deref()
					.map(str::trim)
					.filter(|t| !t.is_empty())
					.ok_or_else(|| SessionError::Configuration("goto_manual requires a target name".to_string()))?;
				let ra = coordinate(manual.ra_coord.as_ref(), "ra_coord", |t| device.parse_ra(t))?;
				let dec = coordinate(manual.dec_coord.as_ref(), "dec_coord", |t| device.parse_dec(t))?;
				Some(Goto::Manual { name: name.to_string(), ra, dec, wait_after: manual.wait_after })
			}
			(None, None) => None,
		};

		Ok(Self {
			autofocus: enabled(&command.auto_focus),
			infinite_focus: enabled(&command.infinite_focus),
			eq_solving: enabled(&command.eq_solving),
			calibration: enabled(&command.calibration),
			goto,
			camera: imaging(&command.setup_camera),
			wide_camera: imaging(&command.setup_wide_camera),
		})
	}

	/// Stages that will execute, in order.
	pub fn stages(&self) -> Vec<Stage> {
		let mut stages = vec![Stage::Init, Stage::GoLive];
		if self.autofocus.is_some() {
			stages.push(Stage::Autofocus);
		}
		if self.infinite_focus.is_some() {
			stages.push(Stage::InfiniteFocus);
		}
		if self.eq_solving.is_some() {
			stages.push(Stage::EqSolving);
		}
		if self.calibration.is_some() {
			stages.push(Stage::Calibration);
		}
		match self.goto {
			Some(Goto::Solar { .. }) => stages.push(Stage::GotoSolar),
			Some(Goto::Manual { .. }) => stages.push(Stage::GotoManual),
			None => {}
		}
		if self.camera.is_some() {
			stages.extend([Stage::SetupCamera, Stage::Capture, Stage::WaitCapture]);
		}
		if self.wide_camera.is_some() {
			stages.extend([Stage::SetupWideCamera, Stage::CaptureWide, Stage::WaitCaptureWide]);
		}
		stages.push(Stage::Complete);
		stages
	}
}

/// Decimal first; sexagesimal text goes to the device's own parser.
fn coordinate<F>(value: Option<&Coordinate>, field: &str, parse: F) -> Result<f64, SessionError>
where
	F: Fn(&str) -> Option<f64>,
{
	let value = value
		.filter(|c| !c.is_blank())
		.ok_or_else(|| SessionError::Configuration(format!("goto_manual requires {field}")))?;
	value
		.as_decimal()
		.or_else(|| parse(&value.as_text()))
		.ok_or_else(|| SessionError::Configuration(format!("cannot parse {field} '{}'", value.as_text())))
}

/// Fixed delays the device needs between commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
	/// After pushing settings or stopping a goto.
	pub settle: Duration,
	/// Before starting a capture and before polling for its end.
	pub capture_lead: Duration,
}

impl Default for SessionTiming {
	fn default() -> Self {
		Self {
			settle: Duration::from_secs(5),
			capture_lead: Duration::from_secs(2),
		}
	}
}

impl SessionTiming {
	pub fn immediate() -> Self {
		Self { settle: Duration::ZERO, capture_lead: Duration::ZERO }
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
	pub stages: Vec<Stage>,
	pub device: String,
	pub settings: DeviceSettings,
}

pub struct SessionRunner<'a> {
	device: &'a dyn DeviceSessionClient,
	timing: SessionTiming,
}

impl<'a> SessionRunner<'a> {
	pub fn new(device: &'a dyn DeviceSessionClient, timing: SessionTiming) -> Self {
		Self { device, timing }
	}

	/// Run every enabled stage of `command` once, failing fast.
	pub fn run(&self, command: &Command) -> Result<SessionReport, SessionError> {
		let plan = SessionPlan::build(command, self.device)?;
		tracing::debug!(stages = ?plan.stages(), "session plan");
		let mut report = SessionReport {
			stages: Vec::new(),
			device: self.device.describe(),
			settings: DeviceSettings::default(),
		};

		self.init()?;
		report.stages.push(Stage::Init);

		check(Stage::GoLive, self.device.go_live())?;
		report.stages.push(Stage::GoLive);

		if let Some(step) = &plan.autofocus {
			self.focus(Stage::Autofocus, step, false)?;
			report.stages.push(Stage::Autofocus);
		}
		if let Some(step) = &plan.infinite_focus {
			self.focus(Stage::InfiniteFocus, step, true)?;
			report.stages.push(Stage::InfiniteFocus);
		}
		if let Some(step) = &plan.eq_solving {
			self.eq_solving(step)?;
			report.stages.push(Stage::EqSolving);
		}
		if let Some(step) = &plan.calibration {
			self.calibration(step)?;
			report.stages.push(Stage::Calibration);
		}

		match &plan.goto {
			Some(Goto::Solar { target, wait_after }) => {
				tracing::info!(body = target.name(), id = target.catalog_id(), "goto solar target");
				check(Stage::GotoSolar, self.device.goto_catalog(*target))?;
				wait_secs(*wait_after);
				report.stages.push(Stage::GotoSolar);
			}
			Some(Goto::Manual { name, ra, dec, wait_after }) => {
				tracing::info!(object = %name, ra, dec, "goto coordinates");
				check(Stage::GotoManual, self.device.goto_coordinates(*ra, *dec, name))?;
				wait_secs(*wait_after);
				report.stages.push(Stage::GotoManual);
			}
			None => {}
		}

		if let Some(setup) = &plan.camera {
			report.settings.camera = self.setup_camera(Stage::SetupCamera, Camera::Tele, setup)?;
			report.stages.push(Stage::SetupCamera);
			self.capture(Stage::Capture, Camera::Tele)?;
			report.stages.push(Stage::Capture);
			self.wait_capture(Stage::WaitCapture, Camera::Tele)?;
			report.stages.push(Stage::WaitCapture);
		}
		if let Some(setup) = &plan.wide_camera {
			report.settings.wide_camera = self.setup_camera(Stage::SetupWideCamera, Camera::Wide, setup)?;
			report.stages.push(Stage::SetupWideCamera);
			self.capture(Stage::CaptureWide, Camera::Wide)?;
			report.stages.push(Stage::CaptureWide);
			self.wait_capture(Stage::WaitCaptureWide, Camera::Wide)?;
			report.stages.push(Stage::WaitCaptureWide);
		}

		report.stages.push(Stage::Complete);
		Ok(report)
	}

	fn init(&self) -> Result<(), SessionError> {
		let mut last = None;
		for attempt in 1..=INIT_TRIES {
			match check(Stage::Init, self.device.sync_time()) {
				Ok(()) => return Ok(()),
				Err(e) => {
					tracing::warn!(attempt, error = %e, "time sync failed");
					last = Some(e);
				}
			}
		}
		Err(last.unwrap_or(SessionError::Stage { stage: Stage::Init, reason: "time sync failed".to_string() }))
	}

	fn focus(&self, stage: Stage, step: &TimedStep, infinite: bool) -> Result<(), SessionError> {
		wait_secs(step.wait_before);
		check(stage, self.device.autofocus(infinite))?;
		wait_secs(step.wait_after);
		Ok(())
	}

	fn eq_solving(&self, step: &TimedStep) -> Result<(), SessionError> {
		check(Stage::EqSolving, self.device.stop_goto())?;
		thread::sleep(self.timing.settle);
		wait_secs(step.wait_before);
		check(Stage::EqSolving, self.device.polar_align())?;
		wait_secs(step.wait_after);
		Ok(())
	}

	fn calibration(&self, step: &TimedStep) -> Result<(), SessionError> {
		let stage = Stage::Calibration;
		for (setting, value) in [
			(CameraSetting::Exposure, CALIBRATION_EXPOSURE),
			(CameraSetting::Gain, CALIBRATION_GAIN),
			(CameraSetting::IrFilter, CALIBRATION_IR),
			(CameraSetting::Binning, CALIBRATION_BINNING),
		] {
			check(stage, self.device.update_camera_setting(setting, value))?;
		}
		thread::sleep(self.timing.settle);
		let settings = self
			.device
			.read_camera_settings(Camera::Tele)
			.map_err(|source| SessionError::Device { stage, source })?;
		if let Some(settings) = &settings {
			log_settings(self.device.model(), Camera::Tele, settings);
		}

		check(stage, self.device.stop_goto())?;
		thread::sleep(self.timing.settle);
		wait_secs(step.wait_before);
		check(stage, self.device.calibrate())?;
		wait_secs(step.wait_after);
		Ok(())
	}

	fn setup_camera(
		&self,
		stage: Stage,
		camera: Camera,
		setup: &CameraSetup,
	) -> Result<Option<CameraSettings>, SessionError> {
		let count = setup.count.map(|c| c.to_string());
		let pushes: Vec<(CameraSetting, Option<&str>)> = match camera {
			Camera::Tele => vec![
				(CameraSetting::Exposure, setup.exposure.as_deref()),
				(CameraSetting::Gain, setup.gain.as_deref()),
				(CameraSetting::IrFilter, setup.ir_cut.as_deref()),
				(CameraSetting::Binning, setup.binning.as_deref()),
				(CameraSetting::Count, count.as_deref()),
			],
			Camera::Wide => vec![
				(CameraSetting::WideExposure, setup.exposure.as_deref()),
				(CameraSetting::WideGain, setup.gain.as_deref()),
				(CameraSetting::Count, count.as_deref()),
			],
		};

		for (setting, value) in pushes {
			let Some(value) = value else { continue };
			tracing::debug!(%stage, field = setting.field_name(), value, "updating camera setting");
			check(stage, self.device.update_camera_setting(setting, value))?;
		}

		thread::sleep(self.timing.settle);
		let settings = self
			.device
			.read_camera_settings(camera)
			.map_err(|source| SessionError::Device { stage, source })?;
		match &settings {
			Some(s) => log_settings(self.device.model(), camera, s),
			None => tracing::warn!(%stage, "device did not report camera settings"),
		}

		wait_secs(setup.wait_after);
		Ok(settings)
	}

	fn capture(&self, stage: Stage, camera: Camera) -> Result<(), SessionError> {
		thread::sleep(self.timing.capture_lead);
		check(stage, self.device.start_capture(camera))?;
		tracing::info!(%stage, "capture started");
		Ok(())
	}

	fn wait_capture(&self, stage: Stage, camera: Camera) -> Result<(), SessionError> {
		thread::sleep(self.timing.capture_lead);
		let mut last = None;
		for attempt in 1..=CAPTURE_WAIT_TRIES {
			match check(stage, self.device.wait_capture(camera)) {
				Ok(()) => {
					tracing::info!(%stage, "capture finished");
					return Ok(());
				}
				Err(e) => {
					tracing::warn!(%stage, attempt, error = %e, "capture not finished");
					last = Some(e);
				}
			}
		}
		Err(last.unwrap_or(SessionError::Stage { stage, reason: "capture did not finish".to_string() }))
	}
}

fn check(stage: Stage, result: DeviceResult) -> Result<(), SessionError> {
	match result {
		Ok(outcome) if outcome.succeeded() => {
			tracing::debug!(%stage, ?outcome, "step succeeded");
			Ok(())
		}
		Ok(outcome) => Err(SessionError::Stage {
			stage,
			reason: format!("device reported failure ({outcome:?})"),
		}),
		Err(source) => Err(SessionError::Device { stage, source }),
	}
}

fn wait_secs(secs: u64) {
	if secs > 0 {
		thread::sleep(Duration::from_secs(secs));
	}
}

fn log_settings(model: DeviceModel, camera: Camera, settings: &CameraSettings) {
	let filter = settings.ir_filter.as_deref().map(|f| model.filter_label(f));
	let binning = settings.binning.as_deref().map(DeviceModel::binning_label);
	tracing::info!(
		?camera,
		exposure = settings.exposure.as_deref().unwrap_or("-"),
		gain = settings.gain.as_deref().unwrap_or("-"),
		filter = filter.unwrap_or("-"),
		binning = binning.unwrap_or("-"),
		count = settings.count,
		"camera settings reported by device"
	);
}
