#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use streamcast_platform::SecretString;

use crate::engine::dispatcher::Dispatcher;
use crate::server::dedup::RecentIds;
use crate::server::health::HealthState;

/// Shared state handed to the webhook listener. Built once in `main`.
pub struct AppContext {
	pub dispatcher: Arc<Dispatcher>,
	/// Verifies EventSub signatures.
	pub webhook_secret: SecretString,
	pub recent_events: Mutex<RecentIds>,
	pub health: HealthState,
}

impl AppContext {
	pub fn new(dispatcher: Arc<Dispatcher>, webhook_secret: SecretString, health: HealthState) -> Self {
		let capacity = dispatcher.settings().event_dedup_capacity;
		Self {
			dispatcher,
			webhook_secret,
			recent_events: Mutex::new(RecentIds::new(capacity)),
			health,
		}
	}

	/// Remembers an EventSub message id; false means it was delivered before.
	pub fn first_delivery(&self, message_id: &str) -> bool {
		self.recent_events
			.lock()
			.map(|mut ids| ids.insert(message_id))
			.unwrap_or(true)
	}
}
