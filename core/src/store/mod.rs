//! Directory-backed job queue.
//!
//! Every job is one JSON document living in exactly one of four areas:
//! `ToDo` (waiting), `Current` (running), `Done` and `Error` (failed).
//! A status change rewrites the document in place, then renames it into the
//! target area; the rename is the commit point, so an interrupted transition
//! leaves the document whole in either the old or the new area.

mod natural;
mod results;

use std::{
	fs, io,
	path::{Path, PathBuf},
};

use thiserror::Error;
use walkdir::WalkDir;

pub use natural::natural_cmp;
pub use results::{ResultSink, SessionRecord};

use crate::models::{IdCommand, JobDocument, JobStatus, Process, Schedule};

const RESULTS_DIR: &str = "Results";
const SESSIONS_DIR: &str = "Sessions";

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("I/O error on {}: {source}", .path.display())]
	Io { path: PathBuf, source: io::Error },

	#[error("invalid JSON in {}: {source}", .path.display())]
	Json { path: PathBuf, source: serde_json::Error },

	#[error("directory walk error: {0}")]
	Walk(#[from] walkdir::Error),
}

impl StoreError {
	pub(crate) fn io(path: &Path, source: io::Error) -> Self {
		StoreError::Io { path: path.to_path_buf(), source }
	}

	pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
		StoreError::Json { path: path.to_path_buf(), source }
	}
}

/// The five directories of one device configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDirs {
	root: PathBuf,
}

impl SessionDirs {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	/// `<data_dir>/Sessions` for the default configuration, or
	/// `<data_dir>/Devices_Sessions/<profile>/Sessions` for a named one.
	pub fn for_profile(data_dir: &Path, profile: Option<&str>) -> Self {
		match profile.map(str::trim) {
			None | Some("") | Some("default") => Self::new(data_dir.join(SESSIONS_DIR)),
			Some(name) => Self::new(data_dir.join("Devices_Sessions").join(name).join(SESSIONS_DIR)),
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn area(&self, status: JobStatus) -> PathBuf {
		self.root.join(status.dir_name())
	}

	pub fn results(&self) -> PathBuf {
		self.root.join(RESULTS_DIR)
	}

	pub fn ensure(&self) -> Result<(), StoreError> {
		for status in JobStatus::ALL {
			let dir = self.area(status);
			fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
		}
		let results = self.results();
		fs::create_dir_all(&results).map_err(|e| StoreError::io(&results, e))?;
		Ok(())
	}
}

/// A job document identified by file name and the area it sits in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobRef {
	pub file_name: String,
	pub status: JobStatus,
}

/// A valid waiting job, parsed once at listing time.
#[derive(Debug, Clone)]
pub struct WaitingJob {
	pub job_ref: JobRef,
	pub document: JobDocument,
	pub schedule: Schedule,
}

impl WaitingJob {
	pub fn id(&self) -> &str {
		self.document.id()
	}
}

/// Document counts per area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AreaCounts {
	pub waiting: usize,
	pub running: usize,
	pub done: usize,
	pub failed: usize,
}

impl AreaCounts {
	pub fn get(&self, status: JobStatus) -> usize {
		match status {
			JobStatus::Waiting => self.waiting,
			JobStatus::Running => self.running,
			JobStatus::Done => self.done,
			JobStatus::Failed => self.failed,
		}
	}
}

#[derive(Debug, Clone)]
pub struct JobStore {
	dirs: SessionDirs,
}

impl JobStore {
	/// Open a store, creating any missing area directories.
	pub fn open(dirs: SessionDirs) -> Result<Self, StoreError> {
		dirs.ensure()?;
		Ok(Self { dirs })
	}

	pub fn dirs(&self) -> &SessionDirs {
		&self.dirs
	}

	pub fn results(&self) -> ResultSink {
		ResultSink::new(self.dirs.results())
	}

	pub fn path_of(&self, job_ref: &JobRef) -> PathBuf {
		self.dirs.area(job_ref.status).join(&job_ref.file_name)
	}

	/// `.json` documents in one area, in natural file-name order.
	pub fn list(&self, status: JobStatus) -> Result<Vec<JobRef>, StoreError> {
		let dir = self.dirs.area(status);
		let mut names = Vec::new();

		for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
			let entry = match entry {
				Ok(e) => e,
				Err(e) if e.depth() == 0 => return Err(e.into()),
				Err(e) => {
					tracing::warn!(error = %e, "skipping unreadable entry");
					continue;
				}
			};
			if !entry.file_type().is_file() {
				continue;
			}
			let name = entry.file_name().to_string_lossy().to_string();
			if name.starts_with('.') || !name.ends_with(".json") {
				continue;
			}
			names.push(name);
		}

		names.sort_by(|a, b| natural_cmp(a, b));
		Ok(names.into_iter().map(|file_name| JobRef { file_name, status }).collect())
	}

	/// Valid waiting jobs in natural file-name order.
	///
	/// Documents that cannot be parsed, lack an identity, carry a bad schedule
	/// or are already claimed are moved to the error area unopened. Documents
	/// that cannot be read at all are left in place for the next cycle.
	pub fn list_waiting(&self) -> Result<Vec<WaitingJob>, StoreError> {
		let mut waiting = Vec::new();

		for job_ref in self.list(JobStatus::Waiting)? {
			let path = self.path_of(&job_ref);
			let bytes = match fs::read(&path) {
				Ok(b) => b,
				Err(e) => {
					tracing::warn!(file = %job_ref.file_name, error = %e, "cannot read job document, skipping");
					continue;
				}
			};

			match validate(&bytes) {
				Ok((document, schedule)) => waiting.push(WaitingJob { job_ref, document, schedule }),
				Err(reason) => {
					tracing::error!(file = %job_ref.file_name, %reason, "invalid job document, moving to error area");
					if let Err(e) = self.quarantine(&job_ref) {
						tracing::warn!(file = %job_ref.file_name, error = %e, "failed to move invalid document");
					}
				}
			}
		}

		Ok(waiting)
	}

	pub fn load(&self, job_ref: &JobRef) -> Result<JobDocument, StoreError> {
		let path = self.path_of(job_ref);
		let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
		serde_json::from_slice(&bytes).map_err(|e| StoreError::json(&path, e))
	}

	/// Move a job to `to`, rewriting its status fields first.
	///
	/// `process` is set from the target status, then `update` may adjust the
	/// rest of the identity block. The document is written where it currently
	/// lives and only then renamed into the target area. If the rename fails
	/// the previous content is written back, so the document keeps matching
	/// the area it is still in.
	pub fn promote<F>(&self, job_ref: &JobRef, to: JobStatus, update: F) -> Result<(JobRef, JobDocument), StoreError>
	where
		F: FnOnce(&mut IdCommand),
	{
		let previous = self.load(job_ref)?;
		let mut document = previous.clone();
		{
			let id = document.id_command_mut();
			id.process = Some(to.process());
			update(id);
		}

		let current = self.path_of(job_ref);
		write_atomic(&current, &document)?;

		let target = match self.move_to(job_ref, to) {
			Ok(target) => target,
			Err(e) => {
				if let Err(restore) = write_atomic(&current, &previous) {
					tracing::error!(file = %job_ref.file_name, error = %restore, "cannot restore job document");
				}
				return Err(e);
			}
		};
		tracing::debug!(file = %job_ref.file_name, from = %job_ref.status, to = %to, "job moved");
		Ok((target, document))
	}

	/// Move a document to the error area without opening it.
	pub fn quarantine(&self, job_ref: &JobRef) -> Result<JobRef, StoreError> {
		self.move_to(job_ref, JobStatus::Failed)
	}

	/// Put jobs left in the running area by an interrupted process back into
	/// the waiting area. Unparseable ones go to the error area.
	pub fn recover_running(&self) -> Result<Vec<JobRef>, StoreError> {
		let mut recovered = Vec::new();

		for job_ref in self.list(JobStatus::Running)? {
			let result = self.promote(&job_ref, JobStatus::Waiting, |id| {
				id.message = "Recovered after an interrupted run".to_string();
			});
			match result {
				Ok((back, _)) => {
					tracing::warn!(file = %job_ref.file_name, "recovered job stuck in running area");
					recovered.push(back);
				}
				Err(StoreError::Json { .. }) => {
					tracing::error!(file = %job_ref.file_name, "unparseable running job, moving to error area");
					self.quarantine(&job_ref)?;
				}
				Err(e) => return Err(e),
			}
		}

		Ok(recovered)
	}

	pub fn counts(&self) -> Result<AreaCounts, StoreError> {
		Ok(AreaCounts {
			waiting: self.list(JobStatus::Waiting)?.len(),
			running: self.list(JobStatus::Running)?.len(),
			done: self.list(JobStatus::Done)?.len(),
			failed: self.list(JobStatus::Failed)?.len(),
		})
	}

	fn move_to(&self, job_ref: &JobRef, to: JobStatus) -> Result<JobRef, StoreError> {
		let target = JobRef { file_name: job_ref.file_name.clone(), status: to };
		if job_ref.status != to {
			let from = self.path_of(job_ref);
			let dest = self.path_of(&target);
			fs::rename(&from, &dest).map_err(|e| StoreError::io(&from, e))?;
		}
		Ok(target)
	}
}

fn validate(bytes: &[u8]) -> Result<(JobDocument, Schedule), String> {
	let document: JobDocument =
		serde_json::from_slice(bytes).map_err(|e| format!("unreadable document: {e}"))?;

	let id = document.id_command();
	if id.uuid.trim().is_empty() {
		return Err("missing job id".to_string());
	}
	if let Some(process) = id.process {
		if process != Process::Wait {
			return Err(format!("already claimed (process = {process:?})"));
		}
	}
	let schedule = document.schedule().map_err(|e| e.to_string())?;

	Ok((document, schedule))
}

/// Write through a hidden temp file in the same directory so readers never
/// observe a half-written document.
fn write_atomic(path: &Path, document: &JobDocument) -> Result<(), StoreError> {
	let text = document.to_json().map_err(|e| StoreError::json(path, e))?;
	let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
	let tmp = path.with_file_name(format!(".{file_name}.tmp"));

	fs::write(&tmp, text).map_err(|e| StoreError::io(&tmp, e))?;
	fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn doc(uuid: &str, date: &str, time: &str) -> String {
		format!(
			r#"{{"command": {{"id_command": {{"uuid": "{uuid}", "description": "test", "date": "{date}", "time": "{time}", "process": "wait", "max_retries": 3, "result": false, "message": "", "nb_try": 0}}}}}}"#
		)
	}

	fn setup() -> (tempfile::TempDir, JobStore) {
		let tmp = tempfile::tempdir().unwrap();
		let store = JobStore::open(SessionDirs::new(tmp.path().join("Sessions"))).unwrap();
		(tmp, store)
	}

	fn put(store: &JobStore, status: JobStatus, name: &str, body: &str) {
		fs::write(store.dirs().area(status).join(name), body).unwrap();
	}

	fn locations(store: &JobStore, name: &str) -> Vec<JobStatus> {
		JobStatus::ALL
			.into_iter()
			.filter(|s| store.dirs().area(*s).join(name).exists())
			.collect()
	}

	#[test]
	fn open_creates_all_areas() {
		let (_tmp, store) = setup();
		for status in JobStatus::ALL {
			assert!(store.dirs().area(status).is_dir());
		}
		assert!(store.dirs().results().is_dir());
	}

	#[test]
	fn profile_layout() {
		let base = Path::new("/data");
		assert_eq!(SessionDirs::for_profile(base, None).root(), Path::new("/data/Sessions"));
		assert_eq!(
			SessionDirs::for_profile(base, Some("garden")).root(),
			Path::new("/data/Devices_Sessions/garden/Sessions")
		);
	}

	#[test]
	fn lists_waiting_in_natural_order() {
		let (_tmp, store) = setup();
		for name in ["10.json", "2.json", "1.json"] {
			put(&store, JobStatus::Waiting, name, &doc(name, "2025-01-01", "10:00:00"));
		}
		put(&store, JobStatus::Waiting, "notes.txt", "ignored");
		put(&store, JobStatus::Waiting, ".3.json.tmp", "ignored");

		let names: Vec<String> = store.list_waiting().unwrap().into_iter().map(|j| j.job_ref.file_name).collect();
		assert_eq!(names, vec!["1.json", "2.json", "10.json"]);
	}

	#[test]
	fn missing_identity_goes_straight_to_error() {
		let (_tmp, store) = setup();
		put(&store, JobStatus::Waiting, "bad.json", r#"{"command": {"auto_focus": {"do_action": true}}}"#);
		put(&store, JobStatus::Waiting, "garbage.json", "{not json");

		assert!(store.list_waiting().unwrap().is_empty());
		assert_eq!(locations(&store, "bad.json"), vec![JobStatus::Failed]);
		assert_eq!(locations(&store, "garbage.json"), vec![JobStatus::Failed]);

		// Never seen as waiting again.
		assert!(store.list_waiting().unwrap().is_empty());
		let raw = fs::read_to_string(store.dirs().area(JobStatus::Failed).join("bad.json")).unwrap();
		assert_eq!(raw, r#"{"command": {"auto_focus": {"do_action": true}}}"#);
	}

	#[test]
	fn claimed_document_is_quarantined() {
		let (_tmp, store) = setup();
		let body = doc("x", "2025-01-01", "10:00:00").replace("\"wait\"", "\"running\"");
		put(&store, JobStatus::Waiting, "x.json", &body);

		assert!(store.list_waiting().unwrap().is_empty());
		assert_eq!(locations(&store, "x.json"), vec![JobStatus::Failed]);
	}

	#[test]
	fn failed_move_keeps_document_as_it_was() {
		let (_tmp, store) = setup();
		put(&store, JobStatus::Waiting, "1.json", &doc("a", "2025-01-01", "10:00:00"));
		let done = store.dirs().area(JobStatus::Done);
		fs::remove_dir(&done).unwrap();
		fs::write(&done, "not a directory").unwrap();

		let job_ref = JobRef { file_name: "1.json".into(), status: JobStatus::Waiting };
		let err = store
			.promote(&job_ref, JobStatus::Done, |id| id.message = "finished".into())
			.unwrap_err();
		assert!(matches!(err, StoreError::Io { .. }));

		let left = store.load(&job_ref).unwrap();
		assert_eq!(left.id_command().process, Some(Process::Wait));
		assert!(left.id_command().message.is_empty());
		assert_eq!(store.list_waiting().unwrap().len(), 1);
	}

	#[test]
	fn bad_schedule_is_quarantined() {
		let (_tmp, store) = setup();
		put(&store, JobStatus::Waiting, "x.json", &doc("x", "tomorrow", "10:00:00"));
		assert!(store.list_waiting().unwrap().is_empty());
		assert_eq!(locations(&store, "x.json"), vec![JobStatus::Failed]);
	}

	#[test]
	fn promote_rewrites_then_moves() {
		let (_tmp, store) = setup();
		put(&store, JobStatus::Waiting, "1.json", &doc("a", "2025-01-01", "10:00:00"));
		let waiting = store.list_waiting().unwrap().remove(0);

		let (running, document) = store
			.promote(&waiting.job_ref, JobStatus::Running, |id| {
				id.starting_date = Some("2025-01-01 10:00:05".into());
			})
			.unwrap();
		assert_eq!(running.status, JobStatus::Running);
		assert_eq!(document.id_command().process, Some(Process::Running));
		assert_eq!(locations(&store, "1.json"), vec![JobStatus::Running]);

		let (done, _) = store
			.promote(&running, JobStatus::Done, |id| {
				id.result = true;
				id.nb_try = 1;
			})
			.unwrap();
		assert_eq!(locations(&store, "1.json"), vec![JobStatus::Done]);

		let stored = store.load(&done).unwrap();
		let id = stored.id_command();
		assert_eq!(id.process, Some(Process::Done));
		assert_eq!(id.starting_date.as_deref(), Some("2025-01-01 10:00:05"));
		assert!(id.result);
		assert_eq!(id.nb_try, 1);
		assert_eq!(id.date.as_deref(), Some("2025-01-01"));

		let leftovers: Vec<_> = fs::read_dir(store.dirs().area(JobStatus::Running)).unwrap().collect();
		assert!(leftovers.is_empty());
	}

	#[test]
	fn promote_of_missing_document_is_io_error() {
		let (_tmp, store) = setup();
		let ghost = JobRef { file_name: "ghost.json".into(), status: JobStatus::Waiting };
		let err = store.promote(&ghost, JobStatus::Running, |_| {}).unwrap_err();
		assert!(matches!(err, StoreError::Io { .. }));
	}

	#[test]
	fn recovers_jobs_left_running() {
		let (_tmp, store) = setup();
		let body = doc("r", "2025-01-01", "10:00:00").replace("\"wait\"", "\"running\"");
		put(&store, JobStatus::Running, "r.json", &body);
		put(&store, JobStatus::Running, "broken.json", "{");

		let recovered = store.recover_running().unwrap();
		assert_eq!(recovered.len(), 1);
		assert_eq!(locations(&store, "r.json"), vec![JobStatus::Waiting]);
		assert_eq!(locations(&store, "broken.json"), vec![JobStatus::Failed]);

		let waiting = store.list_waiting().unwrap();
		assert_eq!(waiting.len(), 1);
		assert_eq!(waiting[0].document.id_command().process, Some(Process::Wait));
	}

	#[test]
	fn counts_each_area() {
		let (_tmp, store) = setup();
		put(&store, JobStatus::Waiting, "1.json", &doc("1", "2025-01-01", "10:00:00"));
		put(&store, JobStatus::Waiting, "2.json", &doc("2", "2025-01-01", "10:00:00"));
		put(&store, JobStatus::Done, "3.json", &doc("3", "2025-01-01", "10:00:00"));

		let counts = store.counts().unwrap();
		assert_eq!(counts.waiting, 2);
		assert_eq!(counts.get(JobStatus::Done), 1);
		assert_eq!(counts.failed, 0);
	}
}
