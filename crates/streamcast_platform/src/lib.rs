#![forbid(unsafe_code)]

pub mod discord;
pub mod twitch;
pub mod youtube;

#[cfg(test)]
pub(crate) mod test_support;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use streamcast_domain::{Announcement, ChannelId, ChannelInfo, GameInfo, MessageId, UserInfo};
use thiserror::Error;
use tokio::sync::watch;
use tracing::error;

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

/// Process-wide "cannot continue" flag.
///
/// Raised when the process can no longer make authenticated upstream calls; `main`
/// waits on it and exits.
#[derive(Clone)]
pub struct FatalSignal {
	tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for FatalSignal {
	fn default() -> Self {
		Self::new()
	}
}

impl FatalSignal {
	pub fn new() -> Self {
		let (tx, _rx) = watch::channel(None);
		Self { tx: Arc::new(tx) }
	}

	pub fn trigger(&self, reason: impl Into<String>) {
		let reason = reason.into();
		error!(%reason, "fatal error raised");
		self.tx.send_replace(Some(reason));
	}

	#[cfg(test)]
	pub(crate) fn is_triggered(&self) -> bool {
		self.tx.borrow().is_some()
	}

	/// Resolves with the reason once `trigger` has been called.
	pub async fn triggered(&self) -> String {
		let mut rx = self.tx.subscribe();
		loop {
			if let Some(reason) = rx.borrow_and_update().clone() {
				return reason;
			}
			if rx.changed().await.is_err() {
				return "fatal signal closed".to_string();
			}
		}
	}
}

/// Messaging-platform failures. None of them are retried.
#[derive(Debug, Error)]
pub enum ChatError {
	#[error("chat transport error: {0}")]
	Transport(String),
	#[error("chat request rejected: status={status} body={body}")]
	Rejected { status: u16, body: String },
	#[error("chat response malformed: {0}")]
	Decode(String),
}

/// Outbound chat collaborator: post or edit one message in one channel.
#[async_trait]
pub trait ChatSink: Send + Sync {
	async fn send_message(&self, channel_id: &ChannelId, message: &Announcement) -> Result<MessageId, ChatError>;

	async fn edit_message(
		&self,
		channel_id: &ChannelId,
		message_id: &MessageId,
		message: &Announcement,
	) -> Result<MessageId, ChatError>;
}

/// Display metadata lookups. No caching is implied; every call may hit upstream.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
	async fn user(&self, user_id: &str) -> anyhow::Result<Option<UserInfo>>;

	async fn channel(&self, broadcaster_id: &str) -> anyhow::Result<Option<ChannelInfo>>;

	async fn game(&self, game_id: &str) -> anyhow::Result<Option<GameInfo>>;
}

pub use twitch::eventsub::EventSubType;

/// Upstream view of one event subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
	pub id: String,
	pub status: String,
	pub kind: String,
	pub broadcaster_id: String,
}

/// Where upstream should deliver notifications for a new subscription.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
	pub callback: String,
	pub secret: SecretString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
	Created(SubscriptionRecord),
	AlreadyExists,
}

/// Event subscription management on the live platform.
#[async_trait]
pub trait SubscriptionApi: Send + Sync {
	async fn list_subscriptions(&self, status: &str) -> anyhow::Result<Vec<SubscriptionRecord>>;

	async fn create_subscription(
		&self,
		kind: EventSubType,
		broadcaster_id: &str,
		transport: &WebhookTransport,
	) -> anyhow::Result<CreateOutcome>;

	async fn delete_subscription(&self, subscription_id: &str) -> anyhow::Result<()>;
}

/// Push-feed hub registration on the video platform.
#[async_trait]
pub trait FeedHub: Send + Sync {
	async fn subscribe(&self, channel_id: &str) -> anyhow::Result<()>;
}
