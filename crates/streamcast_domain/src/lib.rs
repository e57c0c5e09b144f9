#![forbid(unsafe_code)]

mod entry;
mod message;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use entry::{Destination, LiveState, OfflineAction, StreamEntry};
pub use message::{Announcement, Embed, EmbedAuthor, EmbedField};

/// Upstream platforms a monitored source can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
	/// Live-streaming platform (stream online/offline/update events).
	#[serde(rename = "twitch")]
	Twitch,
	/// Video platform (new upload push notifications).
	#[serde(rename = "youtube")]
	YouTube,
}

impl Platform {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Platform::Twitch => "twitch",
			Platform::YouTube => "youtube",
		}
	}
}

impl fmt::Display for Platform {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown platform: {0}")]
	UnknownPlatform(String),
}

impl FromStr for Platform {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"twitch" => Ok(Platform::Twitch),
			"youtube" | "you_tube" | "yt" => Ok(Platform::YouTube),
			other => Err(ParseIdError::UnknownPlatform(other.to_string())),
		}
	}
}

/// Messaging-platform channel that receives announcements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
	/// Create a non-empty `ChannelId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelId::new(s.to_string())
	}
}

/// Messaging-platform message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
	/// Create a non-empty message id.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Broadcaster profile data used to decorate announcements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserInfo {
	pub id: String,
	pub login: String,
	pub display_name: String,
	pub profile_image_url: Option<String>,
}

/// Current channel title and category as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelInfo {
	pub broadcaster_id: String,
	pub broadcaster_login: String,
	pub title: String,
	pub game_id: String,
	pub game_name: String,
}

/// Category/game details.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameInfo {
	pub id: String,
	pub name: String,
	/// Templated URL with `{width}` and `{height}` placeholders.
	pub box_art_url: Option<String>,
}
