use std::fmt::Write;

use astro_core::{
	store::AreaCounts, JobDocument, JobStatus, JobStore, Schedule, StoreError, TIMESTAMP_FORMAT,
};
use chrono::NaiveDateTime;

/// A waiting document as shown by `status`, without moving anything.
#[derive(Debug, Clone, PartialEq)]
pub struct Upcoming {
	pub file: String,
	pub id: String,
	pub description: String,
	pub due: Option<NaiveDateTime>,
}

/// Waiting jobs by due time. Documents that would be rejected are listed
/// last with no due time.
pub fn upcoming(store: &JobStore, now: NaiveDateTime) -> Result<Vec<Upcoming>, StoreError> {
	let mut jobs = Vec::new();
	for job_ref in store.list(JobStatus::Waiting)? {
		let entry = match store.load(&job_ref) {
			Ok(doc) => describe(&job_ref.file_name, &doc, now),
			Err(_) => Upcoming {
				file: job_ref.file_name.clone(),
				id: String::new(),
				description: "unreadable document".to_string(),
				due: None,
			},
		};
		jobs.push(entry);
	}
	jobs.sort_by_key(|j| (j.due.is_none(), j.due));
	Ok(jobs)
}

fn describe(file: &str, doc: &JobDocument, now: NaiveDateTime) -> Upcoming {
	let id = doc.id_command();
	let due = Schedule::parse(id.date.as_deref(), id.time.as_deref())
		.ok()
		.map(|s| s.resolve(now));
	Upcoming {
		file: file.to_string(),
		id: id.uuid.clone(),
		description: id.description.clone(),
		due,
	}
}

pub fn render(counts: &AreaCounts, jobs: &[Upcoming], now: NaiveDateTime) -> String {
	let mut out = String::new();
	for status in JobStatus::ALL {
		let _ = writeln!(out, "{:<8} {:>4}  ({})", status.to_string(), counts.get(status), status.dir_name());
	}
	if jobs.is_empty() {
		return out;
	}

	let _ = writeln!(out, "\nupcoming:");
	for job in jobs {
		let when = match job.due {
			Some(due) if due <= now => "due now".to_string(),
			Some(due) => due.format(TIMESTAMP_FORMAT).to_string(),
			None => "invalid".to_string(),
		};
		let _ = writeln!(out, "  {:<19}  {:<16}  {}  {}", when, job.file, job.id, job.description);
	}
	out
}
