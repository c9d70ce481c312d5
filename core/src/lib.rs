pub mod models;
pub mod store;

pub use models::{JobDocument, JobStatus, Schedule};
pub use store::{JobRef, JobStore, SessionDirs, StoreError, WaitingJob};

/// Timestamp format written into job documents and result records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
