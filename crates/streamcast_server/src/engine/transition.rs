#![forbid(unsafe_code)]

//! Pure transition decisions. Nothing here touches the network or the store.

use streamcast_domain::{LiveState, OfflineAction, StreamEntry};
use streamcast_platform::twitch::eventsub::LiveEventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
	/// Came back online inside the debounce window.
	Debounced,
	AlreadyOffline,
	DuplicateVideo,
	StaleVideo,
}

impl IgnoreReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Debounced => "debounced",
			Self::AlreadyOffline => "already_offline",
			Self::DuplicateVideo => "duplicate_video",
			Self::StaleVideo => "stale_video",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveDecision {
	Ignore(IgnoreReason),
	/// OFFLINE -> LIVE: forget old messages, create everywhere.
	StartSession,
	/// Already LIVE: edit where tracked, create elsewhere.
	Resync,
	/// LIVE -> OFFLINE. `edit_tracked` when the entry asks for an offline card.
	GoOffline { edit_tracked: bool },
	/// Content changed; `edit_tracked` only while live.
	UpdateContent { edit_tracked: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoDecision {
	Announce,
	Ignore(IgnoreReason),
}

pub fn decide_live(entry: &StreamEntry, kind: &LiveEventKind, at: i64, default_debounce_secs: u64) -> LiveDecision {
	match (entry.state(), kind) {
		(LiveState::Offline, LiveEventKind::WentOnline { .. }) => {
			let debounce = i64::try_from(entry.debounce_secs(default_debounce_secs)).unwrap_or(i64::MAX);
			if at.saturating_sub(entry.last_offline) > debounce {
				LiveDecision::StartSession
			} else {
				LiveDecision::Ignore(IgnoreReason::Debounced)
			}
		}
		(LiveState::Live, LiveEventKind::WentOnline { .. }) => LiveDecision::Resync,
		(LiveState::Live, LiveEventKind::WentOffline) => LiveDecision::GoOffline {
			edit_tracked: entry.offline_action == OfflineAction::MarkOffline,
		},
		(LiveState::Offline, LiveEventKind::WentOffline) => LiveDecision::Ignore(IgnoreReason::AlreadyOffline),
		(state, LiveEventKind::ContentUpdated { .. }) => LiveDecision::UpdateContent {
			edit_tracked: state == LiveState::Live,
		},
	}
}

pub fn decide_video(entry: &StreamEntry, video_id: &str, published: i64, now: i64, freshness_secs: u64) -> VideoDecision {
	if entry.has_seen_video(video_id) {
		return VideoDecision::Ignore(IgnoreReason::DuplicateVideo);
	}

	let freshness = i64::try_from(freshness_secs).unwrap_or(i64::MAX);
	if published < now.saturating_sub(freshness) {
		return VideoDecision::Ignore(IgnoreReason::StaleVideo);
	}

	VideoDecision::Announce
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;
	use streamcast_domain::Platform;

	use super::*;

	fn online() -> LiveEventKind {
		LiveEventKind::WentOnline { stream_id: None }
	}

	fn update() -> LiveEventKind {
		LiveEventKind::ContentUpdated {
			title: "New Title".to_string(),
			category_id: "1".to_string(),
			category_name: "Chess".to_string(),
		}
	}

	fn offline_entry(last_offline: i64) -> StreamEntry {
		let mut e = StreamEntry::new(Platform::Twitch, "1234", "someone");
		e.last_offline = last_offline;
		e
	}

	#[test]
	fn debounce_example() {
		let t0 = 1_700_000_000;
		let e = offline_entry(t0);
		assert_eq!(
			decide_live(&e, &online(), t0 + 300, 600),
			LiveDecision::Ignore(IgnoreReason::Debounced)
		);
		assert_eq!(decide_live(&e, &online(), t0 + 900, 600), LiveDecision::StartSession);
	}

	#[test]
	fn debounce_boundary_is_exclusive() {
		let e = offline_entry(1000);
		assert_eq!(
			decide_live(&e, &online(), 1600, 600),
			LiveDecision::Ignore(IgnoreReason::Debounced)
		);
		assert_eq!(decide_live(&e, &online(), 1601, 600), LiveDecision::StartSession);
	}

	#[test]
	fn per_entry_debounce_overrides_default() {
		let mut e = offline_entry(1000);
		e.offline_debounce_secs = Some(10);
		assert_eq!(decide_live(&e, &online(), 1011, 600), LiveDecision::StartSession);
	}

	#[test]
	fn live_entry_transitions() {
		let mut e = offline_entry(0);
		e.is_live = true;
		assert_eq!(decide_live(&e, &online(), 5, 600), LiveDecision::Resync);
		assert_eq!(
			decide_live(&e, &LiveEventKind::WentOffline, 5, 600),
			LiveDecision::GoOffline { edit_tracked: false }
		);
		assert_eq!(
			decide_live(&e, &update(), 5, 600),
			LiveDecision::UpdateContent { edit_tracked: true }
		);

		e.offline_action = OfflineAction::MarkOffline;
		assert_eq!(
			decide_live(&e, &LiveEventKind::WentOffline, 5, 600),
			LiveDecision::GoOffline { edit_tracked: true }
		);
	}

	#[test]
	fn offline_entry_updates_without_dispatch() {
		let e = offline_entry(0);
		assert_eq!(
			decide_live(&e, &update(), 5, 600),
			LiveDecision::UpdateContent { edit_tracked: false }
		);
		assert_eq!(
			decide_live(&e, &LiveEventKind::WentOffline, 5, 600),
			LiveDecision::Ignore(IgnoreReason::AlreadyOffline)
		);
	}

	#[test]
	fn video_decisions() {
		let mut e = StreamEntry::new(Platform::YouTube, "UC1", "chan");
		e.video_ids = vec!["v1".to_string()];
		let now = 1_700_000_000;
		assert_eq!(
			decide_video(&e, "v1", now, now, 86_400),
			VideoDecision::Ignore(IgnoreReason::DuplicateVideo)
		);
		assert_eq!(decide_video(&e, "v2", now, now, 86_400), VideoDecision::Announce);
		assert_eq!(
			decide_video(&e, "v3", now - 86_401, now, 86_400),
			VideoDecision::Ignore(IgnoreReason::StaleVideo)
		);
	}

	proptest! {
		#[test]
		fn online_inside_window_never_starts_a_session(
			last_offline in 0i64..2_000_000_000,
			debounce in 0u64..100_000,
			delta_seed in any::<u64>(),
		) {
			let delta = (delta_seed % (debounce + 1)) as i64;
			let e = offline_entry(last_offline);
			prop_assert_eq!(
				decide_live(&e, &online(), last_offline + delta, debounce),
				LiveDecision::Ignore(IgnoreReason::Debounced)
			);
		}

		#[test]
		fn online_past_window_always_starts_a_session(
			last_offline in 0i64..2_000_000_000,
			debounce in 0u64..100_000,
			extra in 1i64..100_000,
		) {
			let e = offline_entry(last_offline);
			prop_assert_eq!(
				decide_live(&e, &online(), last_offline + debounce as i64 + extra, debounce),
				LiveDecision::StartSession
			);
		}

		#[test]
		fn updates_never_flip_liveness(is_live in any::<bool>(), at in any::<i64>()) {
			let mut e = offline_entry(0);
			e.is_live = is_live;
			let decision = decide_live(&e, &update(), at, 600);
			prop_assert_eq!(decision, LiveDecision::UpdateContent { edit_tracked: is_live });
		}
	}
}
