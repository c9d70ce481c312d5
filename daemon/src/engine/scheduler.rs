use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use astro_core::{
	models::{Command, DeviceSettings},
	store::{ResultSink, SessionRecord},
	JobRef, JobStatus, JobStore, StoreError, WaitingJob, TIMESTAMP_FORMAT,
};
use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::{
	notice::NoticeLog,
	retry::{RetryExecutor, RetryFailure, RetrySuccess},
	session::{SessionError, SessionReport, SessionRunner, SessionTiming},
	supervisor::ConnectionSupervisor,
};
use crate::device::DeviceSessionClient;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SchedulerError {
	#[error("job store unavailable: {0}")]
	Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
	Idle,
	Polling,
	Executing,
	Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
	pub poll_interval: Duration,
	/// Run waiting jobs in order without looking at their schedule.
	pub skip_time_checks: bool,
	pub timing: SessionTiming,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			poll_interval: DEFAULT_POLL_INTERVAL,
			skip_time_checks: false,
			timing: SessionTiming::default(),
		}
	}
}

/// Terminal result of one executed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
	pub job_ref: JobRef,
	pub status: JobStatus,
	pub attempts: u32,
	pub message: String,
}

pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Single worker that drains the waiting area one job at a time.
pub struct SchedulerLoop {
	store: JobStore,
	results: ResultSink,
	device: Arc<dyn DeviceSessionClient>,
	config: SchedulerConfig,
	supervisor: Option<ConnectionSupervisor>,
	notices: NoticeLog,
	state: LoopState,
	clock: Clock,
}

impl SchedulerLoop {
	pub fn new(store: JobStore, device: Arc<dyn DeviceSessionClient>, config: SchedulerConfig) -> Self {
		let results = store.results();
		Self {
			store,
			results,
			device,
			config,
			supervisor: None,
			notices: NoticeLog::new(),
			state: LoopState::Idle,
			clock: Arc::new(|| Local::now().naive_local()),
		}
	}

	/// Ask the operator about reconnecting after failed jobs.
	pub fn with_supervisor(mut self, supervisor: ConnectionSupervisor) -> Self {
		self.supervisor = Some(supervisor);
		self
	}

	pub fn with_clock(mut self, clock: Clock) -> Self {
		self.clock = clock;
		self
	}

	pub fn state(&self) -> LoopState {
		self.state
	}

	/// Poll until `cancel` fires or the store becomes unusable.
	///
	/// Jobs left running by an earlier process are put back in the waiting
	/// area first.
	pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), SchedulerError> {
		let result = self.run_inner(&cancel).await;
		self.state = LoopState::Stopped;
		match &result {
			Ok(()) => tracing::info!("scheduler stopped"),
			Err(e) => tracing::error!(error = %e, "scheduler stopped on store failure"),
		}
		result
	}

	async fn run_inner(&mut self, cancel: &CancellationToken) -> Result<(), SchedulerError> {
		let recovered = self.store.recover_running()?;
		if !recovered.is_empty() {
			tracing::warn!("recovered {} job(s) left running by a previous run", recovered.len());
		}
		tracing::info!(
			root = %self.store.dirs().root().display(),
			skip_time_checks = self.config.skip_time_checks,
			"scheduler started"
		);

		loop {
			if cancel.is_cancelled() {
				return Ok(());
			}

			if self.poll_once(cancel).await?.is_some() {
				continue;
			}

			self.state = LoopState::Idle;
			tokio::select! {
				_ = cancel.cancelled() => return Ok(()),
				_ = tokio::time::sleep(self.config.poll_interval) => {}
			}
		}
	}

	/// One polling pass: execute at most one due job.
	pub async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<Option<JobOutcome>, SchedulerError> {
		self.state = LoopState::Polling;
		let now = (self.clock)();

		let mut waiting = match self.store.list_waiting() {
			Ok(w) => w,
			Err(e) => {
				tracing::warn!(error = %e, "cannot list waiting jobs");
				// Recreate missing areas; only a store that cannot even do that is fatal.
				self.store.dirs().ensure()?;
				return Ok(None);
			}
		};
		self.notices.retain(waiting.iter().map(|j| j.id()));

		// Stable: equal due times keep file-name order.
		waiting.sort_by_key(|j| j.schedule.resolve(now));

		let next = if self.config.skip_time_checks {
			waiting.into_iter().next()
		} else {
			let (due, pending): (Vec<_>, Vec<_>) = waiting.into_iter().partition(|j| j.schedule.is_due(now));
			if due.is_empty() {
				self.announce_pending(&pending, now);
			}
			due.into_iter().next()
		};

		let Some(job) = next else {
			return Ok(None);
		};
		if cancel.is_cancelled() {
			return Ok(None);
		}

		Ok(self.execute(job, cancel).await)
	}

	fn announce_pending(&mut self, pending: &[WaitingJob], now: NaiveDateTime) {
		for job in pending {
			if self.notices.should_notify(job.id(), now) {
				let due = job.schedule.resolve(now);
				tracing::info!(
					job_id = job.id(),
					file = %job.job_ref.file_name,
					due = %due.format(TIMESTAMP_FORMAT),
					"job not yet ready, waiting {}",
					format_wait(due - now)
				);
			}
		}
	}

	async fn execute(&mut self, job: WaitingJob, cancel: &CancellationToken) -> Option<JobOutcome> {
		let id = job.id().to_string();
		let file = job.job_ref.file_name.clone();
		let started_at = (self.clock)().format(TIMESTAMP_FORMAT).to_string();

		let claimed = self.store.promote(&job.job_ref, JobStatus::Running, |cmd| {
			cmd.starting_date = Some(started_at.clone());
			cmd.message.clear();
		});
		let (running, document) = match claimed {
			Ok(claimed) => claimed,
			Err(e @ StoreError::Json { .. }) => {
				tracing::error!(job_id = %id, %file, error = %e, "job changed under us, moving to error area");
				if let Err(e) = self.store.quarantine(&job.job_ref) {
					tracing::warn!(%file, error = %e, "quarantine failed");
				}
				return None;
			}
			Err(e) => {
				tracing::warn!(job_id = %id, %file, error = %e, "cannot claim job, skipping this cycle");
				return None;
			}
		};

		self.notices.forget(&id);
		self.state = LoopState::Executing;
		tracing::info!(job_id = %id, %file, description = %document.id_command().description, "session started");

		let timer = Instant::now();
		let max_retries = document.id_command().max_retries;
		let result = self.attempt(document.command.clone(), max_retries, cancel).await;
		let duration = timer.elapsed();

		// Only device trouble is worth a reconnect. A bad document or a stop is not.
		let device_trouble = match &result {
			Err(failure) if failure.error.is_connection_loss() => {
				tracing::warn!(job_id = %id, "device connection lost during session");
				true
			}
			Err(failure) => failure.error.is_retryable(),
			Ok(_) => false,
		};

		let outcome = self.finalize(&running, &id, &started_at, result, duration);
		if device_trouble {
			if let Some(supervisor) = &self.supervisor {
				supervisor.intervene(cancel).await;
			}
		}
		Some(outcome)
	}

	async fn attempt(
		&self,
		command: Command,
		max_retries: u32,
		cancel: &CancellationToken,
	) -> Result<RetrySuccess<SessionReport>, RetryFailure> {
		let device = self.device.clone();
		let timing = self.config.timing;
		let cancel = cancel.clone();
		let executor = RetryExecutor::new(max_retries);

		let task = tokio::task::spawn_blocking(move || {
			let runner = SessionRunner::new(device.as_ref(), timing);
			executor.run(&cancel, |_| runner.run(&command))
		});

		match task.await {
			Ok(result) => result,
			Err(e) => Err(RetryFailure { attempts: 0, error: SessionError::Internal(e.to_string()) }),
		}
	}

	/// Write the terminal state. A job never stays in the running area once
	/// its attempts are over.
	fn finalize(
		&self,
		running: &JobRef,
		id: &str,
		started_at: &str,
		result: Result<RetrySuccess<SessionReport>, RetryFailure>,
		duration: Duration,
	) -> JobOutcome {
		let (status, attempts, message, settings): (JobStatus, u32, String, Option<DeviceSettings>) = match result {
			Ok(success) => (
				JobStatus::Done,
				success.attempts,
				"Session completed".to_string(),
				Some(success.value.settings),
			),
			Err(failure) => (JobStatus::Failed, failure.attempts, failure.error.to_string(), None),
		};
		let processed_at = (self.clock)().format(TIMESTAMP_FORMAT).to_string();
		let device = self.device.describe();

		match status {
			JobStatus::Done => {
				tracing::info!(job_id = %id, attempts, "session completed in {:.1}s", duration.as_secs_f64())
			}
			_ => tracing::error!(job_id = %id, attempts, %message, "session failed after {:.1}s", duration.as_secs_f64()),
		}

		let written = self.store.promote(running, status, |cmd| {
			cmd.result = status == JobStatus::Done;
			cmd.message = message.clone();
			cmd.nb_try = attempts;
			cmd.processed_date = Some(processed_at.clone());
			cmd.dwarf = Some(device.clone());
			if settings.is_some() {
				cmd.device_settings = settings;
			}
		});

		let (job_ref, status, message) = match written {
			Ok((job_ref, _)) => (job_ref, status, message),
			Err(e) => self.salvage(running, id, status, &message, e),
		};

		let record = SessionRecord {
			uuid: id.to_string(),
			file: job_ref.file_name.clone(),
			outcome: status,
			attempts,
			message: message.clone(),
			device: Some(device),
			started_at: Some(started_at.to_string()),
			processed_at: Some(processed_at),
			duration_secs: duration.as_secs_f64(),
		};
		if let Err(e) = self.results.append((self.clock)().date(), &record) {
			tracing::warn!(job_id = %id, error = %e, "cannot append session record");
		}

		JobOutcome { job_ref, status, attempts, message }
	}

	/// The terminal move failed. File the job as failed with the reason in its
	/// message; if even that fails, move it unopened. Returns where it ended up.
	fn salvage(
		&self,
		running: &JobRef,
		id: &str,
		intended: JobStatus,
		message: &str,
		error: StoreError,
	) -> (JobRef, JobStatus, String) {
		tracing::error!(job_id = %id, error = %error, "cannot file job as {intended}, moving to error area");
		let message = format!("{message}; not filed as {intended}: {error}");

		let marked = self.store.promote(running, JobStatus::Failed, |cmd| {
			cmd.result = false;
			cmd.message = message.clone();
		});
		if let Ok((job_ref, _)) = marked {
			return (job_ref, JobStatus::Failed, message);
		}

		match self.store.quarantine(running) {
			Ok(job_ref) => (job_ref, JobStatus::Failed, message),
			Err(e) => {
				tracing::error!(job_id = %id, error = %e, "job left in running area until the next start");
				(running.clone(), JobStatus::Running, message)
			}
		}
	}
}

fn format_wait(delta: chrono::Duration) -> String {
	let secs = delta.num_seconds().max(0);
	format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}
