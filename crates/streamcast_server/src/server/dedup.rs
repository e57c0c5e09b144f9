#![forbid(unsafe_code)]

use std::collections::{HashSet, VecDeque};

/// Bounded memory of recently seen message ids, oldest evicted first.
#[derive(Debug)]
pub struct RecentIds {
	capacity: usize,
	order: VecDeque<String>,
	seen: HashSet<String>,
}

impl RecentIds {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			order: VecDeque::new(),
			seen: HashSet::new(),
		}
	}

	/// Returns false if `id` was already remembered.
	pub fn insert(&mut self, id: &str) -> bool {
		if self.seen.contains(id) {
			return false;
		}
		self.seen.insert(id.to_string());
		self.order.push_back(id.to_string());
		while self.order.len() > self.capacity {
			if let Some(old) = self.order.pop_front() {
				self.seen.remove(&old);
			}
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn repeats_are_rejected_until_evicted() {
		let mut ids = RecentIds::new(2);
		assert!(ids.insert("a"));
		assert!(!ids.insert("a"));
		assert!(ids.insert("b"));
		assert!(ids.insert("c"));
		assert_eq!(ids.order.len(), 2);
		// "a" fell out of the window.
		assert!(ids.insert("a"));
		assert!(!ids.insert("c"));
	}
}
