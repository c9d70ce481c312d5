use std::cmp::Ordering;

/// Compare file names so that digit runs order by value: `2.json` < `10.json`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
	let mut left = Chunks::new(a);
	let mut right = Chunks::new(b);

	loop {
		match (left.next(), right.next()) {
			(None, None) => return a.cmp(b),
			(None, Some(_)) => return Ordering::Less,
			(Some(_), None) => return Ordering::Greater,
			(Some(l), Some(r)) => {
				let ord = match (l, r) {
					(Chunk::Digits(x), Chunk::Digits(y)) => cmp_digits(x, y),
					(Chunk::Text(x), Chunk::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
					(Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
					(Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
				};
				if ord != Ordering::Equal {
					return ord;
				}
			}
		}
	}
}

fn cmp_digits(x: &str, y: &str) -> Ordering {
	let x = x.trim_start_matches('0');
	let y = y.trim_start_matches('0');
	x.len().cmp(&y.len()).then_with(|| x.cmp(y))
}

enum Chunk<'a> {
	Digits(&'a str),
	Text(&'a str),
}

struct Chunks<'a> {
	rest: &'a str,
}

impl<'a> Chunks<'a> {
	fn new(s: &'a str) -> Self {
		Self { rest: s }
	}
}

impl<'a> Iterator for Chunks<'a> {
	type Item = Chunk<'a>;

	fn next(&mut self) -> Option<Self::Item> {
		let first = self.rest.chars().next()?;
		let digits = first.is_ascii_digit();
		let end = self
			.rest
			.char_indices()
			.find(|(_, c)| c.is_ascii_digit() != digits)
			.map(|(i, _)| i)
			.unwrap_or(self.rest.len());
		let (chunk, rest) = self.rest.split_at(end);
		self.rest = rest;
		Some(if digits { Chunk::Digits(chunk) } else { Chunk::Text(chunk) })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sorted(names: &[&str]) -> Vec<String> {
		let mut v: Vec<String> = names.iter().map(|s| s.to_string()).collect();
		v.sort_by(|a, b| natural_cmp(a, b));
		v
	}

	#[test]
	fn numbers_order_by_value() {
		assert_eq!(sorted(&["10.json", "2.json", "1.json"]), vec!["1.json", "2.json", "10.json"]);
	}

	#[test]
	fn mixed_prefixes() {
		assert_eq!(
			sorted(&["session_10.json", "session_9.json", "alpha.json", "session_09b.json"]),
			vec!["alpha.json", "session_9.json", "session_09b.json", "session_10.json"]
		);
	}

	#[test]
	fn leading_zeros_tie_break_deterministically() {
		assert_eq!(natural_cmp("007.json", "7.json"), "007.json".cmp("7.json"));
		assert_ne!(natural_cmp("007.json", "7.json"), Ordering::Equal);
	}
}
