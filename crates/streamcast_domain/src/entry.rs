#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{ChannelId, MessageId, Platform};

/// One chat channel announcements fan out to, plus the message currently tracked there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
	pub channel_id: ChannelId,

	/// Announcement posted for the current live session, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message_id: Option<MessageId>,
}

impl Destination {
	pub fn new(channel_id: ChannelId) -> Self {
		Self {
			channel_id,
			message_id: None,
		}
	}
}

/// What happens to tracked announcements when a stream ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineAction {
	/// Leave posted messages untouched.
	#[default]
	Leave,
	/// Edit tracked messages into an "offline" card.
	MarkOffline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
	Offline,
	Live,
}

/// Per-source state record: identity, liveness, content, destinations and dedup history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
	pub platform: Platform,

	/// Stable upstream id (broadcaster user id or video channel id).
	pub source_id: String,

	/// Human-readable name (login for the live platform).
	pub name: String,

	/// Embed colour as `#rrggbb`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub colour: Option<String>,

	/// Extra text shown in every announcement.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,

	/// Overrides the engine-wide debounce window.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub offline_debounce_secs: Option<u64>,

	#[serde(default)]
	pub offline_action: OfflineAction,

	#[serde(default)]
	pub is_live: bool,

	/// Unix seconds of the last went-offline transition.
	#[serde(default)]
	pub last_offline: i64,

	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub title: String,

	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub category_id: String,

	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub category_name: String,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub current_stream_id: Option<String>,

	/// Already-announced uploads, oldest first.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub video_ids: Vec<String>,

	/// Kept last so serialized tables follow the plain values.
	#[serde(default)]
	pub destinations: Vec<Destination>,
}

impl StreamEntry {
	pub fn new(platform: Platform, source_id: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			platform,
			source_id: source_id.into(),
			name: name.into(),
			destinations: Vec::new(),
			colour: None,
			description: None,
			offline_debounce_secs: None,
			offline_action: OfflineAction::Leave,
			is_live: false,
			last_offline: 0,
			title: String::new(),
			category_id: String::new(),
			category_name: String::new(),
			current_stream_id: None,
			video_ids: Vec::new(),
		}
	}

	/// Exact match on id, case-insensitive match on name.
	pub fn matches(&self, identifier: &str, platform: Platform) -> bool {
		self.platform == platform && (self.source_id == identifier || self.name.eq_ignore_ascii_case(identifier))
	}

	pub fn state(&self) -> LiveState {
		if self.is_live { LiveState::Live } else { LiveState::Offline }
	}

	pub fn debounce_secs(&self, default_secs: u64) -> u64 {
		self.offline_debounce_secs.unwrap_or(default_secs)
	}

	/// True when title or category still needs to be fetched upstream.
	pub fn content_unknown(&self) -> bool {
		self.title.is_empty() || self.category_id.is_empty()
	}

	pub fn has_seen_video(&self, video_id: &str) -> bool {
		self.video_ids.iter().any(|v| v == video_id)
	}

	/// Append to the seen-list, dropping the oldest ids beyond `limit`.
	pub fn remember_video(&mut self, video_id: impl Into<String>, limit: usize) {
		self.video_ids.push(video_id.into());
		let limit = limit.max(1);
		if self.video_ids.len() > limit {
			let excess = self.video_ids.len() - limit;
			self.video_ids.drain(..excess);
		}
	}

	pub fn tracked_message(&self, channel_id: &ChannelId) -> Option<&MessageId> {
		self.destinations
			.iter()
			.find(|d| &d.channel_id == channel_id)
			.and_then(|d| d.message_id.as_ref())
	}

	/// Returns false when the channel is not one of this entry's destinations.
	pub fn set_tracked_message(&mut self, channel_id: &ChannelId, message_id: MessageId) -> bool {
		match self.destinations.iter_mut().find(|d| &d.channel_id == channel_id) {
			Some(dest) => {
				dest.message_id = Some(message_id);
				true
			}
			None => false,
		}
	}

	/// Public page of the source.
	pub fn source_url(&self) -> String {
		match self.platform {
			Platform::Twitch => format!("https://www.twitch.tv/{}", self.name.to_ascii_lowercase()),
			Platform::YouTube => format!("https://www.youtube.com/channel/{}", self.source_id),
		}
	}
}
