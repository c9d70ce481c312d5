use std::{
	io::{BufRead, Write},
	thread,
};

use async_trait::async_trait;
use daemon::engine::{Decision, ReconnectPrompt};
use tokio::sync::{mpsc, Mutex};

/// Asks on the terminal. The caller bounds how long it waits.
///
/// Lines are read by one dedicated thread for the life of the process, so an
/// unanswered question never leaves a read behind that eats the next answer.
pub struct StdinPrompt {
	lines: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl StdinPrompt {
	pub fn spawn() -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		let reader = thread::Builder::new().name("stdin-reader".into()).spawn(move || {
			for line in std::io::stdin().lock().lines() {
				let Ok(line) = line else { break };
				if tx.send(line).is_err() {
					break;
				}
			}
		});
		if let Err(e) = reader {
			tracing::warn!(error = %e, "cannot read the terminal, reconnect questions will time out");
		}
		Self::from_lines(rx)
	}

	fn from_lines(lines: mpsc::UnboundedReceiver<String>) -> Self {
		Self { lines: Mutex::new(lines) }
	}
}

#[async_trait]
impl ReconnectPrompt for StdinPrompt {
	async fn ask(&self, question: &str) -> Option<Decision> {
		let mut lines = self.lines.lock().await;
		// Anything typed before the question is not an answer to it.
		while lines.try_recv().is_ok() {}

		print!("{question} > ");
		if let Err(e) = std::io::stdout().flush() {
			tracing::debug!(error = %e, "cannot flush stdout");
		}

		let line = lines.recv().await?;
		parse_answer(&line)
	}
}

pub fn parse_answer(line: &str) -> Option<Decision> {
	match line.trim().to_lowercase().as_str() {
		"r" | "reconnect" | "y" | "yes" => Some(Decision::Reconnect),
		"" | "c" | "continue" | "n" | "no" => Some(Decision::Continue),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use std::{sync::Arc, time::Duration};

	use super::*;

	#[test]
	fn answers() {
		assert_eq!(parse_answer("R\n"), Some(Decision::Reconnect));
		assert_eq!(parse_answer(" yes "), Some(Decision::Reconnect));
		assert_eq!(parse_answer("\n"), Some(Decision::Continue));
		assert_eq!(parse_answer("c"), Some(Decision::Continue));
		assert_eq!(parse_answer("maybe"), None);
	}

	#[tokio::test]
	async fn timed_out_question_does_not_take_the_next_answer() {
		let (tx, rx) = mpsc::unbounded_channel();
		let prompt = Arc::new(StdinPrompt::from_lines(rx));

		let first = tokio::time::timeout(Duration::from_millis(50), prompt.ask("first?")).await;
		assert!(first.is_err());

		let asking = prompt.clone();
		let handle = tokio::spawn(async move { asking.ask("second?").await });
		tokio::time::sleep(Duration::from_millis(50)).await;
		tx.send("r".to_string()).unwrap();
		assert_eq!(handle.await.unwrap(), Some(Decision::Reconnect));
	}

	#[tokio::test]
	async fn earlier_input_is_not_an_answer() {
		let (tx, rx) = mpsc::unbounded_channel();
		let prompt = Arc::new(StdinPrompt::from_lines(rx));
		tx.send("r".to_string()).unwrap();

		let asking = prompt.clone();
		let handle = tokio::spawn(async move { asking.ask("reconnect?").await });
		tokio::time::sleep(Duration::from_millis(50)).await;
		tx.send("c".to_string()).unwrap();

		assert_eq!(handle.await.unwrap(), Some(Decision::Continue));
	}

	#[tokio::test]
	async fn closed_input_gives_no_answer() {
		let (tx, rx) = mpsc::unbounded_channel::<String>();
		drop(tx);
		assert_eq!(StdinPrompt::from_lines(rx).ask("reconnect?").await, None);
	}
}
