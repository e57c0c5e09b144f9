#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use streamcast_domain::{Announcement, ChannelId, ChannelInfo, GameInfo, MessageId, StreamEntry, UserInfo};
use streamcast_platform::{
	ChatError, ChatSink, CreateOutcome, EventSubType, FeedHub, MetadataLookup, SubscriptionApi, SubscriptionRecord,
	WebhookTransport,
};

use super::store::StatePersister;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
	Send {
		channel_id: String,
		message: Announcement,
	},
	Edit {
		channel_id: String,
		message_id: String,
		message: Announcement,
	},
}

/// Records every call; channels in `failing` reject everything.
#[derive(Default)]
pub struct FakeChat {
	pub calls: Mutex<Vec<ChatCall>>,
	pub failing: Mutex<HashSet<String>>,
	next_id: AtomicUsize,
}

impl FakeChat {
	pub fn fail_channel(&self, channel_id: &str) {
		self.failing.lock().unwrap().insert(channel_id.to_string());
	}

	pub fn calls(&self) -> Vec<ChatCall> {
		self.calls.lock().unwrap().clone()
	}

	fn rejects(&self, channel_id: &ChannelId) -> bool {
		self.failing.lock().unwrap().contains(channel_id.as_str())
	}
}

#[async_trait]
impl ChatSink for FakeChat {
	async fn send_message(&self, channel_id: &ChannelId, message: &Announcement) -> Result<MessageId, ChatError> {
		self.calls.lock().unwrap().push(ChatCall::Send {
			channel_id: channel_id.to_string(),
			message: message.clone(),
		});
		if self.rejects(channel_id) {
			return Err(ChatError::Transport("connection reset".to_string()));
		}
		let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
		Ok(MessageId::new(format!("{channel_id}-m{n}")).unwrap())
	}

	async fn edit_message(
		&self,
		channel_id: &ChannelId,
		message_id: &MessageId,
		message: &Announcement,
	) -> Result<MessageId, ChatError> {
		self.calls.lock().unwrap().push(ChatCall::Edit {
			channel_id: channel_id.to_string(),
			message_id: message_id.to_string(),
			message: message.clone(),
		});
		if self.rejects(channel_id) {
			return Err(ChatError::Rejected {
				status: 404,
				body: "Unknown Message".to_string(),
			});
		}
		Ok(message_id.clone())
	}
}

#[derive(Default)]
pub struct FakeMetadata {
	pub channel: Mutex<Option<ChannelInfo>>,
	pub channel_lookups: AtomicUsize,
}

#[async_trait]
impl MetadataLookup for FakeMetadata {
	async fn user(&self, user_id: &str) -> anyhow::Result<Option<UserInfo>> {
		Ok(Some(UserInfo {
			id: user_id.to_string(),
			login: "paintbrushpuke".to_string(),
			display_name: "PaintBrushPuke".to_string(),
			profile_image_url: None,
		}))
	}

	async fn channel(&self, _broadcaster_id: &str) -> anyhow::Result<Option<ChannelInfo>> {
		self.channel_lookups.fetch_add(1, Ordering::SeqCst);
		Ok(self.channel.lock().unwrap().clone())
	}

	async fn game(&self, game_id: &str) -> anyhow::Result<Option<GameInfo>> {
		Ok(Some(GameInfo {
			id: game_id.to_string(),
			name: format!("game-{game_id}"),
			box_art_url: None,
		}))
	}
}

#[derive(Default)]
pub struct MemoryPersister {
	pub snapshots: Mutex<Vec<Vec<StreamEntry>>>,
}

impl MemoryPersister {
	pub fn count(&self) -> usize {
		self.snapshots.lock().unwrap().len()
	}

	pub fn last(&self) -> Option<Vec<StreamEntry>> {
		self.snapshots.lock().unwrap().last().cloned()
	}
}

impl StatePersister for MemoryPersister {
	fn persist(&self, entries: &[StreamEntry]) -> anyhow::Result<()> {
		self.snapshots.lock().unwrap().push(entries.to_vec());
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubCall {
	List(String),
	Create(EventSubType, String),
	Delete(String),
}

/// Upstream subscription table keyed by status.
#[derive(Default)]
pub struct FakeSubscriptions {
	pub records: Mutex<Vec<SubscriptionRecord>>,
	pub calls: Mutex<Vec<SubCall>>,
	pub conflict_on_create: Mutex<HashSet<String>>,
}

impl FakeSubscriptions {
	pub fn with(records: Vec<SubscriptionRecord>) -> Self {
		Self {
			records: Mutex::new(records),
			..Self::default()
		}
	}

	pub fn calls(&self) -> Vec<SubCall> {
		self.calls.lock().unwrap().clone()
	}
}

pub fn record(id: &str, status: &str, kind: &str, broadcaster_id: &str) -> SubscriptionRecord {
	SubscriptionRecord {
		id: id.to_string(),
		status: status.to_string(),
		kind: kind.to_string(),
		broadcaster_id: broadcaster_id.to_string(),
	}
}

#[async_trait]
impl SubscriptionApi for FakeSubscriptions {
	async fn list_subscriptions(&self, status: &str) -> anyhow::Result<Vec<SubscriptionRecord>> {
		self.calls.lock().unwrap().push(SubCall::List(status.to_string()));
		Ok(self
			.records
			.lock()
			.unwrap()
			.iter()
			.filter(|r| r.status == status)
			.cloned()
			.collect())
	}

	async fn create_subscription(
		&self,
		kind: EventSubType,
		broadcaster_id: &str,
		_transport: &WebhookTransport,
	) -> anyhow::Result<CreateOutcome> {
		self.calls
			.lock()
			.unwrap()
			.push(SubCall::Create(kind, broadcaster_id.to_string()));
		if self.conflict_on_create.lock().unwrap().contains(broadcaster_id) {
			return Ok(CreateOutcome::AlreadyExists);
		}
		let mut records = self.records.lock().unwrap();
		let created = record(
			&format!("sub-{}", records.len() + 1),
			"webhook_callback_verification_pending",
			kind.as_helix_type(),
			broadcaster_id,
		);
		records.push(created.clone());
		Ok(CreateOutcome::Created(created))
	}

	async fn delete_subscription(&self, subscription_id: &str) -> anyhow::Result<()> {
		self.calls
			.lock()
			.unwrap()
			.push(SubCall::Delete(subscription_id.to_string()));
		self.records.lock().unwrap().retain(|r| r.id != subscription_id);
		Ok(())
	}
}

#[derive(Default)]
pub struct FakeHub {
	pub subscribed: Mutex<Vec<String>>,
	pub failing: Mutex<HashSet<String>>,
}

#[async_trait]
impl FeedHub for FakeHub {
	async fn subscribe(&self, channel_id: &str) -> anyhow::Result<()> {
		self.subscribed.lock().unwrap().push(channel_id.to_string());
		if self.failing.lock().unwrap().contains(channel_id) {
			anyhow::bail!("hub unavailable");
		}
		Ok(())
	}
}
