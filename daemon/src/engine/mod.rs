pub mod notice;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod supervisor;

pub use retry::{RetryExecutor, RetryFailure, RetrySuccess};
pub use scheduler::{JobOutcome, LoopState, SchedulerConfig, SchedulerError, SchedulerLoop};
pub use session::{SessionError, SessionPlan, SessionReport, SessionRunner, SessionTiming, Stage};
pub use supervisor::{ConnectionSupervisor, Decision, ReconnectPrompt};
