mod config;
mod prompt;
mod shutdown;
mod status;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use astro_core::{JobStatus, JobStore};
use chrono::Local;
use clap::{Parser, Subcommand};
use daemon::{
	actions::{self, DEFAULT_ACTION_ATTEMPTS, DEFAULT_ACTION_PAUSE},
	engine::{ConnectionSupervisor, SchedulerLoop},
	simulator::{SimulatedConnector, SimulatedDevice},
	DeviceLink, DeviceSessionClient,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
	config::{Backend, Config},
	prompt::StdinPrompt,
};

#[derive(Parser, Debug)]
#[command(name = "astro-scheduler")]
#[command(version)]
#[command(about = "Runs queued imaging sessions on a smart telescope, one at a time")]
struct Args {
	/// Config file (default: <config dir>/astro-scheduler/config.toml)
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	/// Named device configuration
	#[arg(long, global = true)]
	profile: Option<String>,

	/// Pair with the device before starting, even if an address is known
	#[arg(long, global = true)]
	ble: bool,

	/// Device family (2 or 3). Remembered for later runs.
	#[arg(long = "id", global = true, value_parser = clap::value_parser!(u8).range(2..=3))]
	device_id: Option<u8>,

	/// Device address. Remembered for later runs.
	#[arg(long, global = true)]
	ip: Option<String>,

	/// Drive the built-in simulator instead of a telescope. Jobs are filed as
	/// if they ran.
	#[arg(long, global = true)]
	simulate: bool,

	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Process the session queue until stopped (default)
	Run {
		/// Run waiting jobs in order, ignoring their schedule
		#[arg(long)]
		skip_time_checks: bool,
	},
	/// Show queue counts and upcoming jobs
	Status,
	/// Take host mode on the device
	Lock,
	/// Release host mode on the device
	Unlock,
	/// Polar-align the mount (EQ solving)
	EqSolve,
	/// Move the mount into polar-alignment position
	PolarPosition,
	/// Calibrate the mount
	Calibrate,
}

fn main() -> Result<()> {
	let args = Args::parse();

	let config_path = args
		.config
		.clone()
		.or_else(config::default_path)
		.context("no config directory on this platform, pass --config")?;
	let mut cfg = Config::load(&config_path)?;
	if cfg.remember_identity(args.ip.as_deref(), args.device_id) {
		cfg.save(&config_path)?;
	}
	if let Some(profile) = &args.profile {
		cfg.profile = Some(profile.clone());
	}

	let _log_guard = init_logging(&cfg)?;
	tracing::info!(config = %config_path.display(), profile = cfg.profile.as_deref().unwrap_or("default"), "starting");

	let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
	let target = Target { force_pair: args.ble, simulate: args.simulate };
	let result = rt.block_on(dispatch(args.command.unwrap_or(Commands::Run { skip_time_checks: false }), cfg, target));
	rt.shutdown_timeout(Duration::from_secs(5));

	if let Err(e) = &result {
		tracing::error!("{e:#}");
	}
	result
}

/// Terminal plus a plain, never-rotated log file in the log directory.
fn init_logging(cfg: &Config) -> Result<WorkerGuard> {
	let log_dir = cfg.log_dir();
	std::fs::create_dir_all(&log_dir).with_context(|| format!("cannot create {}", log_dir.display()))?;
	let file_appender = tracing_appender::rolling::never(&log_dir, "astro-scheduler.log");
	let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with(tracing_subscriber::fmt::layer())
		.with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
		.init();

	Ok(guard)
}

/// How to reach the device for this invocation.
#[derive(Debug, Clone, Copy)]
struct Target {
	force_pair: bool,
	simulate: bool,
}

async fn dispatch(command: Commands, cfg: Config, target: Target) -> Result<()> {
	match command {
		Commands::Run { skip_time_checks } => run(cfg, target, skip_time_checks).await,
		Commands::Status => show_status(&cfg),
		Commands::Lock => {
			maintenance(&cfg, target, |d| {
				actions::toggle_host_lock(d, true, DEFAULT_ACTION_ATTEMPTS, DEFAULT_ACTION_PAUSE).map(drop)
			})
			.await
		}
		Commands::Unlock => {
			maintenance(&cfg, target, |d| {
				actions::toggle_host_lock(d, false, DEFAULT_ACTION_ATTEMPTS, DEFAULT_ACTION_PAUSE).map(drop)
			})
			.await
		}
		Commands::EqSolve => {
			maintenance(&cfg, target, |d| {
				actions::eq_solve(d, DEFAULT_ACTION_ATTEMPTS, DEFAULT_ACTION_PAUSE).map(drop)
			})
			.await
		}
		Commands::PolarPosition => {
			let pause = cfg.timing().settle;
			maintenance(&cfg, target, move |d| actions::polar_position(d, pause)).await
		}
		Commands::Calibrate => {
			let settle = cfg.timing().settle;
			maintenance(&cfg, target, move |d| actions::calibrate(d, settle)).await
		}
	}
}

/// The device backend. A real one plugs in behind the same traits; the
/// simulator only runs when asked for, so no queue is drained by accident.
fn open_device(cfg: &Config, target: Target) -> Result<(Arc<dyn DeviceSessionClient>, Arc<DeviceLink>)> {
	match cfg.backend(target.simulate) {
		Backend::Simulator => {
			tracing::warn!("using the simulated device, no telescope will move");
			let device: Arc<dyn DeviceSessionClient> = Arc::new(SimulatedDevice::new(cfg.model()));
			let link = DeviceLink::new(
				Arc::new(SimulatedConnector::default()),
				device.clone(),
				cfg.connection_mode(target.force_pair),
			)
			.with_pause(cfg.link_pause());
			Ok((device, Arc::new(link)))
		}
		Backend::None => bail!(
			"no device backend configured: set `backend` in the config file, or pass --simulate for a dry run"
		),
	}
}

async fn connect(link: &Arc<DeviceLink>) -> Result<()> {
	tracing::info!(mode = ?link.mode(), "connecting to device");
	let setup = link.clone();
	tokio::task::spawn_blocking(move || setup.establish())
		.await
		.context("connection setup task failed")??;
	Ok(())
}

async fn disconnect(link: &Arc<DeviceLink>) {
	let closing = link.clone();
	if let Err(e) = tokio::task::spawn_blocking(move || closing.disconnect()).await {
		tracing::warn!(error = %e, "disconnect task failed");
	}
}

async fn run(cfg: Config, target: Target, skip_time_checks: bool) -> Result<()> {
	let (device, link) = open_device(&cfg, target)?;
	let dirs = cfg.session_dirs();
	let store = JobStore::open(dirs.clone()).with_context(|| format!("cannot open {}", dirs.root().display()))?;
	let cancel = shutdown::install_shutdown_handler();

	// The loop only starts once the link is up.
	connect(&link).await?;

	let mut scheduler_config = cfg.scheduler_config();
	scheduler_config.skip_time_checks |= skip_time_checks;
	let mut scheduler = SchedulerLoop::new(store, device, scheduler_config);
	if cfg.ask_before_reconnect {
		let supervisor =
			ConnectionSupervisor::new(Arc::new(StdinPrompt::spawn()), link.clone()).with_window(cfg.reconnect_window());
		scheduler = scheduler.with_supervisor(supervisor);
	}

	let worker = tokio::spawn(async move { scheduler.run(cancel).await });
	let result = worker.await.context("scheduler task failed")?;

	disconnect(&link).await;
	result.context("scheduler stopped")
}

async fn maintenance<F>(cfg: &Config, target: Target, action: F) -> Result<()>
where
	F: FnOnce(&dyn DeviceSessionClient) -> Result<(), actions::ActionError> + Send + 'static,
{
	let (device, link) = open_device(cfg, target)?;
	connect(&link).await?;

	let result = tokio::task::spawn_blocking(move || action(device.as_ref()))
		.await
		.context("device action task failed")?;

	disconnect(&link).await;
	result?;
	println!("done");
	Ok(())
}

fn show_status(cfg: &Config) -> Result<()> {
	let dirs = cfg.session_dirs();
	let store = JobStore::open(dirs.clone()).with_context(|| format!("cannot open {}", dirs.root().display()))?;
	let now = Local::now().naive_local();

	let counts = store.counts()?;
	let jobs = status::upcoming(&store, now)?;
	println!("{}", dirs.root().display());
	print!("{}", status::render(&counts, &jobs, now));

	let today = store.results().read(now.date())?;
	if !today.is_empty() {
		let done = today.iter().filter(|r| r.outcome == JobStatus::Done).count();
		println!("\ntoday: {} finished, {} failed", done, today.len() - done);
	}
	Ok(())
}
