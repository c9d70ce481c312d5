use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};

/// Minutes after first sight at which a pending job is mentioned again.
/// Past the last one, it is mentioned once per hour.
const THRESHOLDS_MINUTES: [i64; 4] = [5, 15, 30, 60];
const HOURLY_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy)]
struct Seen {
	first: NaiveDateTime,
	last: NaiveDateTime,
}

/// Rate limiter for "not yet ready" messages, keyed by job id.
#[derive(Debug, Default)]
pub struct NoticeLog {
	seen: HashMap<String, Seen>,
}

impl NoticeLog {
	pub fn new() -> Self {
		Self::default()
	}

	/// True on first sight of `id` and whenever the next threshold has passed.
	pub fn should_notify(&mut self, id: &str, now: NaiveDateTime) -> bool {
		let Some(seen) = self.seen.get_mut(id) else {
			self.seen.insert(id.to_string(), Seen { first: now, last: now });
			return true;
		};

		let notified_at = seen.last - seen.first;
		let next = THRESHOLDS_MINUTES
			.iter()
			.map(|m| Duration::minutes(*m))
			.find(|t| *t > notified_at)
			.unwrap_or(notified_at + Duration::minutes(HOURLY_MINUTES));

		if now - seen.first >= next {
			seen.last = now;
			true
		} else {
			false
		}
	}

	pub fn forget(&mut self, id: &str) {
		self.seen.remove(id);
	}

	/// Drop entries for jobs that are no longer waiting.
	pub fn retain<'a>(&mut self, live: impl IntoIterator<Item = &'a str>) {
		let live: std::collections::HashSet<&str> = live.into_iter().collect();
		self.seen.retain(|id, _| live.contains(id.as_str()));
	}
}

#[cfg(test)]
mod tests {
	use chrono::NaiveDate;

	use super::*;

	fn at(minutes: i64) -> NaiveDateTime {
		NaiveDate::from_ymd_opt(2025, 1, 1)
			.unwrap()
			.and_hms_opt(20, 0, 0)
			.unwrap()
			+ Duration::minutes(minutes)
	}

	#[test]
	fn follows_thresholds_then_hourly() {
		let mut log = NoticeLog::new();
		let fired: Vec<i64> = (0..=200).filter(|m| log.should_notify("job", at(*m))).collect();
		assert_eq!(fired, vec![0, 5, 15, 30, 60, 120, 180]);
	}

	#[test]
	fn late_poll_does_not_fire_twice() {
		let mut log = NoticeLog::new();
		assert!(log.should_notify("job", at(0)));
		assert!(log.should_notify("job", at(17)));
		assert!(!log.should_notify("job", at(18)));
		assert!(log.should_notify("job", at(30)));
	}

	#[test]
	fn forgetting_resets_first_sight() {
		let mut log = NoticeLog::new();
		assert!(log.should_notify("a", at(0)));
		assert!(!log.should_notify("a", at(1)));
		log.forget("a");
		assert!(log.should_notify("a", at(2)));
	}

	#[test]
	fn retain_drops_vanished_jobs() {
		let mut log = NoticeLog::new();
		log.should_notify("a", at(0));
		log.should_notify("b", at(0));
		log.retain(["b"]);
		assert!(log.should_notify("a", at(1)));
		assert!(!log.should_notify("b", at(1)));
	}
}
