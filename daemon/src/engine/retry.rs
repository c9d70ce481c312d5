use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::session::SessionError;

/// The last error of an exhausted or aborted attempt sequence.
#[derive(Debug, Error)]
#[error("failed after {attempts} attempt(s): {error}")]
pub struct RetryFailure {
	pub attempts: u32,
	#[source]
	pub error: SessionError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySuccess<T> {
	pub attempts: u32,
	pub value: T,
}

/// Runs a whole pipeline again after a retryable failure, back to back.
///
/// Cancellation is only looked at between attempts. An attempt in flight
/// always runs to its end.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
	max_attempts: u32,
}

impl RetryExecutor {
	/// A job asking for zero retries still gets one attempt.
	pub fn new(max_attempts: u32) -> Self {
		Self { max_attempts: max_attempts.max(1) }
	}

	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}

	pub fn run<T, F>(&self, cancel: &CancellationToken, mut attempt: F) -> Result<RetrySuccess<T>, RetryFailure>
	where
		F: FnMut(u32) -> Result<T, SessionError>,
	{
		let mut attempts = 0;

		loop {
			if cancel.is_cancelled() {
				tracing::warn!(attempts, "stop requested, not starting another attempt");
				return Err(RetryFailure { attempts, error: SessionError::Interrupted });
			}

			attempts += 1;
			tracing::info!("attempt {}/{}", attempts, self.max_attempts);

			match attempt(attempts) {
				Ok(value) => return Ok(RetrySuccess { attempts, value }),
				Err(error) if !error.is_retryable() => {
					tracing::error!(attempts, %error, "attempt failed, not retrying");
					return Err(RetryFailure { attempts, error });
				}
				Err(error) if attempts >= self.max_attempts => {
					tracing::error!(attempts, %error, "attempt failed, retries exhausted");
					return Err(RetryFailure { attempts, error });
				}
				Err(error) => {
					tracing::warn!(attempts, %error, "attempt failed, retrying");
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use astro_core::models::{DeviceModel, JobDocument};

	use super::*;
	use crate::{
		engine::session::{SessionRunner, SessionTiming, Stage},
		simulator::SimulatedDevice,
	};

	fn stage_failure() -> SessionError {
		SessionError::Stage { stage: Stage::GoLive, reason: "refused".into() }
	}

	#[test]
	fn always_failing_device_gets_exactly_max_attempts() {
		let device = SimulatedDevice::new(DeviceModel::Dwarf2).refuse("go_live", u32::MAX);
		let command = JobDocument::from_json(r#"{"command": {"id_command": {"uuid": "p3"}}}"#)
			.unwrap()
			.command;
		let runner = SessionRunner::new(&device, SessionTiming::immediate());

		let failure = RetryExecutor::new(3)
			.run(&CancellationToken::new(), |_| runner.run(&command))
			.unwrap_err();

		assert_eq!(failure.attempts, 3);
		assert_eq!(failure.error.stage(), Some(Stage::GoLive));
		assert_eq!(device.count("go_live"), 3);
	}

	#[test]
	fn succeeds_on_a_later_attempt() {
		let mut calls = 0;
		let success = RetryExecutor::new(3)
			.run(&CancellationToken::new(), |n| {
				calls += 1;
				if n < 2 {
					Err(stage_failure())
				} else {
					Ok("done")
				}
			})
			.unwrap();
		assert_eq!(success.attempts, 2);
		assert_eq!(success.value, "done");
		assert_eq!(calls, 2);
	}

	#[test]
	fn configuration_errors_are_not_retried() {
		let failure = RetryExecutor::new(5)
			.run(&CancellationToken::new(), |_| -> Result<(), _> {
				Err(SessionError::Configuration("both gotos".into()))
			})
			.unwrap_err();
		assert_eq!(failure.attempts, 1);
	}

	#[test]
	fn cancellation_stops_before_the_next_attempt() {
		let cancel = CancellationToken::new();
		let failure = RetryExecutor::new(3)
			.run(&cancel, |_| -> Result<(), _> {
				cancel.cancel();
				Err(stage_failure())
			})
			.unwrap_err();
		assert_eq!(failure.attempts, 1);
		assert!(matches!(failure.error, SessionError::Interrupted));
		assert_eq!(failure.error.to_string(), "interrupted by user");
	}

	#[test]
	fn zero_retries_still_attempts_once() {
		let executor = RetryExecutor::new(0);
		assert_eq!(executor.max_attempts(), 1);
		let failure = executor
			.run(&CancellationToken::new(), |_| -> Result<(), _> { Err(stage_failure()) })
			.unwrap_err();
		assert_eq!(failure.attempts, 1);
	}
}
