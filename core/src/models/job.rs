use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::device::DeviceSettings;
use super::step::{CameraSetup, GotoManual, GotoSolar, TimedStep};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One scheduled device session, exactly as persisted on disk.
///
/// Keys this model does not know about are carried in `extra` so that
/// rewriting a document never drops what another tool put there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDocument {
    pub command: Command,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `command` object: identity block plus the optional session steps.
///
/// An absent step deserializes to `None`, which the runner treats the same as
/// `do_action = false`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub id_command: IdCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq_solving: Option<TimedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_focus: Option<TimedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infinite_focus: Option<TimedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<TimedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto_solar: Option<GotoSolar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto_manual: Option<GotoManual>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_camera: Option<CameraSetup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_wide_camera: Option<CameraSetup>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Identity, schedule and status bookkeeping of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdCommand {
    pub uuid: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub result: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub nb_try: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dwarf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_settings: Option<DeviceSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Value of the `process` field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Process {
    Wait,
    Pending,
    Running,
    Done,
    Error,
}

/// Where a job document lives. Exactly one at any time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Waiting,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Failed,
    ];

    /// Directory name of the area holding documents in this status.
    pub fn dir_name(self) -> &'static str {
        match self {
            JobStatus::Waiting => "ToDo",
            JobStatus::Running => "Current",
            JobStatus::Done => "Done",
            JobStatus::Failed => "Error",
        }
    }

    /// The `process` value written into the document on entering this status.
    pub fn process(self) -> Process {
        match self {
            JobStatus::Waiting => Process::Wait,
            JobStatus::Running => Process::Running,
            JobStatus::Done => Process::Done,
            JobStatus::Failed => Process::Error,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    Date(String),

    #[error("invalid time '{0}', expected HH:MM:SS")]
    Time(String),
}

/// Parsed schedule. A missing part falls back to the corresponding part of
/// "now" independently of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Schedule {
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl Schedule {
    pub fn parse(date: Option<&str>, time: Option<&str>) -> Result<Self, ScheduleError> {
        let date = match date.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => Some(
                NaiveDate::parse_from_str(d, DATE_FORMAT)
                    .map_err(|_| ScheduleError::Date(d.to_string()))?,
            ),
            None => None,
        };
        let time = match time.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => Some(
                NaiveTime::parse_from_str(t, TIME_FORMAT)
                    .map_err(|_| ScheduleError::Time(t.to_string()))?,
            ),
            None => None,
        };
        Ok(Self { date, time })
    }

    /// The moment the job becomes eligible, relative to `now`.
    pub fn resolve(&self, now: NaiveDateTime) -> NaiveDateTime {
        let date = self.date.unwrap_or_else(|| now.date());
        let time = self.time.unwrap_or_else(|| now.time());
        NaiveDateTime::new(date, time)
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now >= self.resolve(now)
    }
}

impl JobDocument {
    pub fn id(&self) -> &str {
        &self.command.id_command.uuid
    }

    pub fn id_command(&self) -> &IdCommand {
        &self.command.id_command
    }

    pub fn id_command_mut(&mut self) -> &mut IdCommand {
        &mut self.command.id_command
    }

    pub fn schedule(&self) -> Result<Schedule, ScheduleError> {
        let id = &self.command.id_command;
        Schedule::parse(id.date.as_deref(), id.time.as_deref())
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    const MINIMAL: &str = r#"{
        "command": {
            "id_command": {
                "uuid": "a1",
                "description": "M42",
                "date": "2025-01-01",
                "time": "10:00:00",
                "process": "wait"
            }
        }
    }"#;

    #[test]
    fn due_exactly_at_schedule() {
        let schedule = Schedule::parse(Some("2025-01-01"), Some("10:00:00")).unwrap();
        assert!(!schedule.is_due(at("2025-01-01 09:59:59")));
        assert!(schedule.is_due(at("2025-01-01 10:00:00")));
        assert!(schedule.is_due(at("2025-01-01 10:00:01")));
    }

    #[test]
    fn missing_date_means_today_at_given_time() {
        let schedule = Schedule::parse(None, Some("22:30:00")).unwrap();
        assert!(!schedule.is_due(at("2025-03-10 22:29:59")));
        assert!(schedule.is_due(at("2025-03-10 22:30:00")));
    }

    #[test]
    fn missing_schedule_is_due_now() {
        let schedule = Schedule::parse(None, Some("  ")).unwrap();
        assert!(schedule.is_due(at("2025-03-10 04:00:00")));
    }

    #[test]
    fn rejects_malformed_date() {
        let err = Schedule::parse(Some("01/02/2025"), None).unwrap_err();
        assert_eq!(err, ScheduleError::Date("01/02/2025".into()));
    }

    #[test]
    fn absent_steps_deserialize_as_none() {
        let doc = JobDocument::from_json(MINIMAL).unwrap();
        assert_eq!(doc.id(), "a1");
        assert_eq!(doc.id_command().max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(doc.id_command().process, Some(Process::Wait));
        assert!(doc.command.setup_camera.is_none());
        assert!(doc.command.goto_manual.is_none());
    }

    #[test]
    fn missing_id_command_is_rejected() {
        let err = JobDocument::from_json(r#"{"command": {"auto_focus": {"do_action": true}}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn unknown_keys_survive_rewrite() {
        let text = r#"{
            "command": {
                "id_command": {"uuid": "x", "author": "me"},
                "custom_step": {"foo": 1}
            },
            "comment": "keep me"
        }"#;
        let doc = JobDocument::from_json(text).unwrap();
        let back: Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();
        assert_eq!(back["comment"], "keep me");
        assert_eq!(back["command"]["custom_step"]["foo"], 1);
        assert_eq!(back["command"]["id_command"]["author"], "me");
    }

    #[test]
    fn status_areas_and_process_values() {
        assert_eq!(JobStatus::Waiting.dir_name(), "ToDo");
        assert_eq!(JobStatus::Running.dir_name(), "Current");
        assert_eq!(JobStatus::Failed.dir_name(), "Error");
        assert_eq!(JobStatus::Failed.process(), Process::Error);
    }
}
