use std::{
	fs::{self, OpenOptions},
	io::Write,
	path::PathBuf,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::models::JobStatus;

const RECORD_FILE: &str = "sessions.jsonl";

/// One finished job, as appended to the results area for later reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
	pub uuid: String,
	pub file: String,
	pub outcome: JobStatus,
	pub attempts: u32,
	pub message: String,
	pub device: Option<String>,
	pub started_at: Option<String>,
	pub processed_at: Option<String>,
	pub duration_secs: f64,
}

/// Append-only, date-bucketed output location: `Results/<YYYY-MM-DD>/`.
#[derive(Debug, Clone)]
pub struct ResultSink {
	root: PathBuf,
}

impl ResultSink {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	/// Directory for artifacts produced on `date`. Created on demand.
	pub fn bucket(&self, date: NaiveDate) -> Result<PathBuf, StoreError> {
		let dir = self.root.join(date.format("%Y-%m-%d").to_string());
		fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
		Ok(dir)
	}

	/// Append one JSON line describing a finished job.
	pub fn append(&self, date: NaiveDate, record: &SessionRecord) -> Result<PathBuf, StoreError> {
		let path = self.bucket(date)?.join(RECORD_FILE);
		let mut line = serde_json::to_string(record).map_err(|e| StoreError::json(&path, e))?;
		line.push('\n');

		let mut file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)
			.map_err(|e| StoreError::io(&path, e))?;
		file.write_all(line.as_bytes()).map_err(|e| StoreError::io(&path, e))?;
		Ok(path)
	}

	/// Records appended on `date`, oldest first. Unparseable lines are skipped.
	pub fn read(&self, date: NaiveDate) -> Result<Vec<SessionRecord>, StoreError> {
		let path = self.root.join(date.format("%Y-%m-%d").to_string()).join(RECORD_FILE);
		let text = match fs::read_to_string(&path) {
			Ok(t) => t,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StoreError::io(&path, e)),
		};
		Ok(text.lines().filter_map(|l| serde_json::from_str(l).ok()).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(uuid: &str, outcome: JobStatus) -> SessionRecord {
		SessionRecord {
			uuid: uuid.into(),
			file: format!("{uuid}.json"),
			outcome,
			attempts: 1,
			message: String::new(),
			device: None,
			started_at: None,
			processed_at: None,
			duration_secs: 1.5,
		}
	}

	#[test]
	fn appends_into_date_bucket() {
		let tmp = tempfile::tempdir().unwrap();
		let sink = ResultSink::new(tmp.path().join("Results"));
		let day = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();

		sink.append(day, &record("a", JobStatus::Done)).unwrap();
		let path = sink.append(day, &record("b", JobStatus::Failed)).unwrap();

		assert!(path.ends_with("2025-01-02/sessions.jsonl"));
		let records = sink.read(day).unwrap();
		assert_eq!(records.len(), 2);
		assert_eq!(records[0].uuid, "a");
		assert_eq!(records[1].outcome, JobStatus::Failed);
	}

	#[test]
	fn reading_empty_day_is_empty() {
		let tmp = tempfile::tempdir().unwrap();
		let sink = ResultSink::new(tmp.path());
		let day = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
		assert!(sink.read(day).unwrap().is_empty());
	}
}
