use tokio_util::sync::CancellationToken;

/// Cancel the returned token on Ctrl-C (and SIGTERM on unix). Work in flight
/// is allowed to finish; nothing new starts after that.
pub fn install_shutdown_handler() -> CancellationToken {
	let token = CancellationToken::new();
	let trigger = token.clone();

	tokio::spawn(async move {
		wait_for_signal().await;
		trigger.cancel();
	});

	token
}

#[cfg(unix)]
async fn wait_for_signal() {
	use tokio::signal::unix::{signal, SignalKind};

	let mut sigterm = match signal(SignalKind::terminate()) {
		Ok(s) => s,
		Err(e) => {
			tracing::warn!(error = %e, "cannot listen for SIGTERM, Ctrl-C only");
			ctrl_c().await;
			return;
		}
	};

	tokio::select! {
		_ = sigterm.recv() => tracing::info!("received SIGTERM, finishing current work"),
		_ = ctrl_c() => {}
	}
}

#[cfg(not(unix))]
async fn wait_for_signal() {
	ctrl_c().await;
}

async fn ctrl_c() {
	match tokio::signal::ctrl_c().await {
		Ok(()) => tracing::info!("received Ctrl-C, finishing current work"),
		Err(e) => {
			tracing::error!(error = %e, "cannot listen for Ctrl-C");
			std::future::pending::<()>().await;
		}
	}
}
