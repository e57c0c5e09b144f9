#![forbid(unsafe_code)]

pub mod dispatcher;
pub mod feed;
pub mod message;
pub mod store;
pub mod subscriptions;
pub mod transition;

#[cfg(test)]
pub(crate) mod fakes;

use std::time::Duration;

/// Tunables for the state machine and the background lifecycle tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
	/// Minimum offline time before a went-online counts as a new session.
	pub default_offline_debounce_secs: u64,
	/// Uploads published longer ago than this are not announced.
	pub video_freshness_secs: u64,
	/// Seen-list bound per video channel.
	pub video_history_limit: usize,
	/// Lease requested from the WebSub hub.
	pub feed_lease_secs: u64,
	pub feed_renewal_interval: Duration,
	/// `None` disables the periodic EventSub reconcile.
	pub twitch_reconcile_interval: Option<Duration>,
	/// Recently seen EventSub message ids kept for redelivery dedup.
	pub event_dedup_capacity: usize,
}

impl Default for EngineSettings {
	fn default() -> Self {
		Self {
			default_offline_debounce_secs: 600,
			video_freshness_secs: 24 * 60 * 60,
			video_history_limit: 50,
			feed_lease_secs: 604_800,
			feed_renewal_interval: Duration::from_secs(144 * 60 * 60),
			twitch_reconcile_interval: Some(Duration::from_secs(24 * 60 * 60)),
			event_dedup_capacity: 256,
		}
	}
}
