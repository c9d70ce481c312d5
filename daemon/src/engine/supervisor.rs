use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::connection::DeviceLink;

pub const DEFAULT_DECISION_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	/// Go back to polling with the link as it is.
	Continue,
	/// Re-establish the link first.
	Reconnect,
}

/// Source of the operator's answer after a failed job.
#[async_trait]
pub trait ReconnectPrompt: Send + Sync {
	/// `None` when no usable answer was given.
	async fn ask(&self, question: &str) -> Option<Decision>;
}

/// Offers a reconnect after a failed job, defaulting to carrying on.
pub struct ConnectionSupervisor {
	prompt: Arc<dyn ReconnectPrompt>,
	link: Arc<DeviceLink>,
	window: Duration,
}

impl ConnectionSupervisor {
	pub fn new(prompt: Arc<dyn ReconnectPrompt>, link: Arc<DeviceLink>) -> Self {
		Self { prompt, link, window: DEFAULT_DECISION_WINDOW }
	}

	pub fn with_window(mut self, window: Duration) -> Self {
		self.window = window;
		self
	}

	pub async fn intervene(&self, cancel: &CancellationToken) -> Decision {
		let question = format!(
			"The last session failed. Reconnect to the device before continuing? [r]econnect / [c]ontinue ({}s, default continue)",
			self.window.as_secs()
		);

		let decision = tokio::select! {
			_ = cancel.cancelled() => return Decision::Continue,
			answer = tokio::time::timeout(self.window, self.prompt.ask(&question)) => match answer {
				Ok(Some(decision)) => decision,
				Ok(None) => Decision::Continue,
				Err(_) => {
					tracing::info!("no answer within {}s, continuing without reconnect", self.window.as_secs());
					Decision::Continue
				}
			},
		};

		if decision == Decision::Reconnect {
			tracing::info!("re-establishing device link");
			let link = self.link.clone();
			match tokio::task::spawn_blocking(move || link.establish()).await {
				Ok(Ok(())) => tracing::info!("device link re-established"),
				Ok(Err(e)) => tracing::error!(error = %e, "reconnect failed, continuing anyway"),
				Err(e) => tracing::error!(error = %e, "reconnect task panicked"),
			}
		}

		decision
	}
}
