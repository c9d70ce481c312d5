use std::{
	fs, io,
	path::{Path, PathBuf},
	time::Duration,
};

use astro_core::{models::DeviceModel, SessionDirs};
use daemon::{
	engine::{SchedulerConfig, SessionTiming},
	ConnectionMode,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const APP_DIR: &str = "astro-scheduler";

/// What answers the device calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
	/// Nothing configured. Commands that need a device refuse to start.
	#[default]
	None,
	/// In-process stand-in. Jobs are filed without any telescope moving.
	Simulator,
}
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("cannot read {}: {source}", .path.display())]
	Read { path: PathBuf, source: io::Error },

	#[error("invalid config {}: {source}", .path.display())]
	Parse { path: PathBuf, source: toml::de::Error },

	#[error("cannot serialize config: {0}")]
	Serialize(#[from] toml::ser::Error),

	#[error("cannot write {}: {source}", .path.display())]
	Write { path: PathBuf, source: io::Error },
}

/// `<config_dir>/astro-scheduler/config.toml`, when the platform has one.
pub fn default_path() -> Option<PathBuf> {
	dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data_dir: Option<PathBuf>,
	/// Named device configuration. Unset means the default one.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub profile: Option<String>,
	/// Device family, 2 or 3. Stored after it was given once on the command line.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub device_id: Option<u8>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ip: Option<String>,
	pub backend: Backend,
	/// Pause between failed attempts to set up the device link.
	pub link_retry_secs: u64,
	pub poll_interval_secs: u64,
	pub skip_time_checks: bool,
	pub ask_before_reconnect: bool,
	pub reconnect_window_secs: u64,
	pub settle_secs: u64,
	pub capture_lead_secs: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub log_dir: Option<PathBuf>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			data_dir: None,
			profile: None,
			device_id: None,
			ip: None,
			backend: Backend::None,
			link_retry_secs: 5,
			poll_interval_secs: 10,
			skip_time_checks: false,
			ask_before_reconnect: true,
			reconnect_window_secs: 60,
			settle_secs: 5,
			capture_lead_secs: 2,
			log_dir: None,
		}
	}
}

impl Config {
	/// A missing file is an empty config.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = match fs::read_to_string(path) {
			Ok(t) => t,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
			Err(source) => return Err(ConfigError::Read { path: path.to_path_buf(), source }),
		};
		toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
	}

	pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
		let text = toml::to_string_pretty(self)?;
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).map_err(|source| ConfigError::Write { path: parent.to_path_buf(), source })?;
		}
		fs::write(path, text).map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })
	}

	/// Keep a device identity given on the command line for later runs.
	/// Returns whether anything changed.
	pub fn remember_identity(&mut self, ip: Option<&str>, device_id: Option<u8>) -> bool {
		let mut changed = false;
		if let Some(ip) = ip.map(str::trim).filter(|ip| !ip.is_empty()) {
			if self.ip.as_deref() != Some(ip) {
				self.ip = Some(ip.to_string());
				changed = true;
			}
		}
		if let Some(id) = device_id {
			if self.device_id != Some(id) {
				self.device_id = Some(id);
				changed = true;
			}
		}
		changed
	}

	pub fn data_dir(&self) -> PathBuf {
		self.data_dir
			.clone()
			.or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR)))
			.unwrap_or_else(|| PathBuf::from(APP_DIR))
	}

	pub fn log_dir(&self) -> PathBuf {
		self.log_dir.clone().unwrap_or_else(|| self.data_dir().join("logs"))
	}

	pub fn session_dirs(&self) -> SessionDirs {
		SessionDirs::for_profile(&self.data_dir(), self.profile.as_deref())
	}

	pub fn model(&self) -> DeviceModel {
		self.device_id.and_then(DeviceModel::from_id).unwrap_or_default()
	}

	/// Pairing when forced or when no address is known.
	pub fn connection_mode(&self, force_pair: bool) -> ConnectionMode {
		match self.ip.as_deref() {
			Some(ip) if !force_pair => ConnectionMode::Direct { ip: ip.to_string() },
			_ => ConnectionMode::Pair,
		}
	}

	/// `--simulate` overrides the configured backend for one run.
	pub fn backend(&self, simulate: bool) -> Backend {
		if simulate {
			Backend::Simulator
		} else {
			self.backend
		}
	}

	pub fn link_pause(&self) -> Duration {
		Duration::from_secs(self.link_retry_secs)
	}

	pub fn timing(&self) -> SessionTiming {
		SessionTiming {
			settle: Duration::from_secs(self.settle_secs),
			capture_lead: Duration::from_secs(self.capture_lead_secs),
		}
	}

	pub fn scheduler_config(&self) -> SchedulerConfig {
		SchedulerConfig {
			poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
			skip_time_checks: self.skip_time_checks,
			timing: self.timing(),
		}
	}

	pub fn reconnect_window(&self) -> Duration {
		Duration::from_secs(self.reconnect_window_secs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_file_gives_defaults() {
		let tmp = tempfile::tempdir().unwrap();
		let config = Config::load(&tmp.path().join("nope.toml")).unwrap();
		assert_eq!(config, Config::default());
		assert_eq!(config.poll_interval_secs, 10);
		assert!(config.ask_before_reconnect);
	}

	#[test]
	fn partial_file_keeps_other_defaults() {
		let tmp = tempfile::tempdir().unwrap();
		let path = tmp.path().join("config.toml");
		fs::write(&path, "ip = \"192.168.88.1\"\ndevice_id = 3\nsettle_secs = 1\n").unwrap();

		let config = Config::load(&path).unwrap();
		assert_eq!(config.ip.as_deref(), Some("192.168.88.1"));
		assert_eq!(config.model(), DeviceModel::Dwarf3);
		assert_eq!(config.timing().settle, Duration::from_secs(1));
		assert_eq!(config.capture_lead_secs, 2);
	}

	#[test]
	fn broken_file_is_an_error() {
		let tmp = tempfile::tempdir().unwrap();
		let path = tmp.path().join("config.toml");
		fs::write(&path, "poll_interval_secs = \"soon\"").unwrap();
		assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
	}

	#[test]
	fn identity_is_persisted() {
		let tmp = tempfile::tempdir().unwrap();
		let path = tmp.path().join("nested").join("config.toml");

		let mut config = Config::default();
		assert!(config.remember_identity(Some("10.0.0.7"), Some(2)));
		assert!(!config.remember_identity(Some("10.0.0.7"), None));
		config.save(&path).unwrap();

		let loaded = Config::load(&path).unwrap();
		assert_eq!(loaded.ip.as_deref(), Some("10.0.0.7"));
		assert_eq!(loaded.device_id, Some(2));
	}

	#[test]
	fn no_backend_unless_asked_for() {
		let tmp = tempfile::tempdir().unwrap();
		let path = tmp.path().join("config.toml");
		assert_eq!(Config::default().backend(false), Backend::None);
		assert_eq!(Config::default().backend(true), Backend::Simulator);

		fs::write(&path, "backend = \"simulator\"\nlink_retry_secs = 0\n").unwrap();
		let config = Config::load(&path).unwrap();
		assert_eq!(config.backend(false), Backend::Simulator);
		assert_eq!(config.link_pause(), Duration::ZERO);

		fs::write(&path, "backend = \"telescope\"\n").unwrap();
		assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
	}

	#[test]
	fn connection_mode_resolution() {
		let mut config = Config::default();
		assert_eq!(config.connection_mode(false), ConnectionMode::Pair);

		config.ip = Some("10.0.0.7".into());
		assert_eq!(config.connection_mode(false), ConnectionMode::Direct { ip: "10.0.0.7".into() });
		assert_eq!(config.connection_mode(true), ConnectionMode::Pair);
	}

	#[test]
	fn profile_selects_session_root() {
		let config = Config {
			data_dir: Some(PathBuf::from("/srv/astro")),
			profile: Some("backyard".into()),
			..Config::default()
		};
		assert_eq!(
			config.session_dirs().root(),
			Path::new("/srv/astro/Devices_Sessions/backyard/Sessions")
		);
		assert_eq!(config.log_dir(), PathBuf::from("/srv/astro/logs"));
	}
}
