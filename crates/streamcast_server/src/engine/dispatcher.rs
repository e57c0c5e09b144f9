#![forbid(unsafe_code)]

use std::sync::Arc;

use futures::future::join_all;
use streamcast_domain::{Announcement, ChannelId, GameInfo, MessageId, Platform, StreamEntry, UserInfo};
use streamcast_platform::twitch::eventsub::{LiveEvent, LiveEventKind};
use streamcast_platform::youtube::FeedEntry;
use streamcast_platform::{ChatError, ChatSink, MetadataLookup};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::EngineSettings;
use super::message::{live_card, offline_card, video_announcement};
use super::store::StreamStore;
use super::transition::{IgnoreReason, LiveDecision, VideoDecision, decide_live, decide_video};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanOutReport {
	pub created: usize,
	pub edited: usize,
	pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
	UnknownSource,
	Ignored(IgnoreReason),
	/// State changed, nothing was sent.
	StateOnly,
	Dispatched(FanOutReport),
}

#[derive(Debug, Clone)]
enum SendOp {
	Create,
	Edit(MessageId),
}

/// One destination's unit of work. Owns everything it needs.
#[derive(Debug, Clone)]
struct DestinationJob {
	channel_id: ChannelId,
	op: SendOp,
}

struct JobResult {
	channel_id: ChannelId,
	edited: bool,
	result: Result<MessageId, ChatError>,
}

fn create_everywhere(entry: &StreamEntry) -> Vec<DestinationJob> {
	entry
		.destinations
		.iter()
		.map(|d| DestinationJob {
			channel_id: d.channel_id.clone(),
			op: SendOp::Create,
		})
		.collect()
}

fn edit_tracked(entry: &StreamEntry) -> Vec<DestinationJob> {
	entry
		.destinations
		.iter()
		.filter_map(|d| {
			d.message_id.clone().map(|id| DestinationJob {
				channel_id: d.channel_id.clone(),
				op: SendOp::Edit(id),
			})
		})
		.collect()
}

fn edit_or_create(entry: &StreamEntry) -> Vec<DestinationJob> {
	entry
		.destinations
		.iter()
		.map(|d| DestinationJob {
			channel_id: d.channel_id.clone(),
			op: d.message_id.clone().map(SendOp::Edit).unwrap_or(SendOp::Create),
		})
		.collect()
}

fn log_persist(result: anyhow::Result<()>, source_id: &str, what: &'static str) {
	if let Err(e) = result {
		metrics::counter!("streamcast_state_persist_failures_total").increment(1);
		error!(source_id, what, error = %e, "failed to persist stream state");
	}
}

fn ignored(reason: IgnoreReason, source_id: &str) -> DispatchOutcome {
	metrics::counter!("streamcast_events_ignored_total", "reason" => reason.as_str()).increment(1);
	debug!(source_id, reason = reason.as_str(), "event ignored");
	DispatchOutcome::Ignored(reason)
}

/// Drives the per-entry state machine and fans announcements out.
///
/// The store lock is held from lookup until the resulting state is persisted, so two
/// events for the same source never interleave their decisions.
pub struct Dispatcher {
	store: Arc<Mutex<StreamStore>>,
	chat: Arc<dyn ChatSink>,
	metadata: Arc<dyn MetadataLookup>,
	settings: EngineSettings,
}

impl Dispatcher {
	pub fn new(
		store: Arc<Mutex<StreamStore>>,
		chat: Arc<dyn ChatSink>,
		metadata: Arc<dyn MetadataLookup>,
		settings: EngineSettings,
	) -> Self {
		Self {
			store,
			chat,
			metadata,
			settings,
		}
	}

	pub fn settings(&self) -> &EngineSettings {
		&self.settings
	}

	pub async fn handle_live_event(&self, event: LiveEvent, now: i64) -> DispatchOutcome {
		let mut store = self.store.lock().await;

		let Some(index) = store
			.find_entry(&event.broadcaster_id, Platform::Twitch)
			.or_else(|| store.find_entry(&event.broadcaster_login, Platform::Twitch))
		else {
			metrics::counter!("streamcast_events_unknown_source_total").increment(1);
			debug!(broadcaster_id = %event.broadcaster_id, "event for unmonitored broadcaster");
			return DispatchOutcome::UnknownSource;
		};
		let Some(entry) = store.entry(index).cloned() else {
			return DispatchOutcome::UnknownSource;
		};
		let source_id = entry.source_id.clone();

		let decision = decide_live(&entry, &event.kind, event.at, self.settings.default_offline_debounce_secs);
		debug!(source_id, ?decision, at = event.at, "live transition decided");

		match (decision, event.kind) {
			(LiveDecision::Ignore(reason), _) => ignored(reason, &source_id),

			(LiveDecision::StartSession, kind) => {
				if entry.content_unknown() {
					self.refresh_content(&mut store, index, &source_id).await;
				}

				let stream_id = match kind {
					LiveEventKind::WentOnline { stream_id } => stream_id,
					_ => None,
				};
				log_persist(store.set_live(index, stream_id).await, &source_id, "set_live");
				metrics::counter!("streamcast_sessions_started_total").increment(1);
				info!(source_id, name = %entry.name, "stream went live");

				let Some(entry) = store.entry(index).cloned() else {
					return DispatchOutcome::StateOnly;
				};
				let payload = self.live_payload(&entry, now).await;
				let report = self.fan_out(&mut store, index, create_everywhere(&entry), payload, true).await;
				DispatchOutcome::Dispatched(report)
			}

			(LiveDecision::Resync, _) => {
				let payload = self.live_payload(&entry, now).await;
				let report = self.fan_out(&mut store, index, edit_or_create(&entry), payload, true).await;
				DispatchOutcome::Dispatched(report)
			}

			(LiveDecision::GoOffline { edit_tracked: mark }, _) => {
				log_persist(store.set_offline(index, event.at).await, &source_id, "set_offline");
				info!(source_id, name = %entry.name, "stream went offline");

				let jobs = edit_tracked(&entry);
				if !mark || jobs.is_empty() {
					return DispatchOutcome::StateOnly;
				}

				let user = self.lookup_user(&entry).await;
				let game = self.lookup_game(&entry).await;
				let payload = offline_card(&entry, user.as_ref(), game.as_ref());
				let report = self.fan_out(&mut store, index, jobs, payload, true).await;
				DispatchOutcome::Dispatched(report)
			}

			(
				LiveDecision::UpdateContent { edit_tracked: live },
				LiveEventKind::ContentUpdated {
					title,
					category_id,
					category_name,
				},
			) => {
				log_persist(
					store.set_content(index, title, category_id, category_name).await,
					&source_id,
					"set_content",
				);

				let Some(entry) = store.entry(index).cloned() else {
					return DispatchOutcome::StateOnly;
				};
				let jobs = edit_tracked(&entry);
				if !live || jobs.is_empty() {
					return DispatchOutcome::StateOnly;
				}

				let payload = self.live_payload(&entry, now).await;
				let report = self.fan_out(&mut store, index, jobs, payload, true).await;
				DispatchOutcome::Dispatched(report)
			}

			(LiveDecision::UpdateContent { .. }, _) => DispatchOutcome::StateOnly,
		}
	}

	pub async fn handle_new_video(&self, video: FeedEntry, now: i64) -> DispatchOutcome {
		let mut store = self.store.lock().await;

		let Some(index) = store.find_entry(&video.channel_id, Platform::YouTube) else {
			metrics::counter!("streamcast_events_unknown_source_total").increment(1);
			debug!(channel_id = %video.channel_id, "video for unmonitored channel");
			return DispatchOutcome::UnknownSource;
		};
		let Some(entry) = store.entry(index).cloned() else {
			return DispatchOutcome::UnknownSource;
		};

		let decision = decide_video(
			&entry,
			&video.video_id,
			video.published,
			now,
			self.settings.video_freshness_secs,
		);
		if let VideoDecision::Ignore(reason) = decision {
			return ignored(reason, &entry.source_id);
		}

		let author = if video.author.trim().is_empty() {
			entry.name.as_str()
		} else {
			video.author.as_str()
		};
		info!(source_id = %entry.source_id, video_id = %video.video_id, "announcing new video");

		let payload = video_announcement(author, &video.link);
		let report = self
			.fan_out(&mut store, index, create_everywhere(&entry), payload, false)
			.await;

		log_persist(
			store
				.record_video(index, &video.video_id, self.settings.video_history_limit)
				.await,
			&entry.source_id,
			"record_video",
		);

		DispatchOutcome::Dispatched(report)
	}

	async fn refresh_content(&self, store: &mut StreamStore, index: usize, source_id: &str) {
		match self.metadata.channel(source_id).await {
			Ok(Some(channel)) => log_persist(
				store
					.set_content(index, channel.title, channel.game_id, channel.game_name)
					.await,
				source_id,
				"set_content",
			),
			Ok(None) => warn!(source_id, "channel lookup returned nothing"),
			Err(e) => warn!(source_id, error = %e, "channel lookup failed"),
		}
	}

	async fn lookup_user(&self, entry: &StreamEntry) -> Option<UserInfo> {
		match self.metadata.user(&entry.source_id).await {
			Ok(user) => user,
			Err(e) => {
				warn!(source_id = %entry.source_id, error = %e, "user lookup failed");
				None
			}
		}
	}

	async fn lookup_game(&self, entry: &StreamEntry) -> Option<GameInfo> {
		if entry.category_id.is_empty() {
			return None;
		}
		match self.metadata.game(&entry.category_id).await {
			Ok(game) => game,
			Err(e) => {
				warn!(source_id = %entry.source_id, category_id = %entry.category_id, error = %e, "game lookup failed");
				None
			}
		}
	}

	async fn live_payload(&self, entry: &StreamEntry, now: i64) -> Announcement {
		let user = self.lookup_user(entry).await;
		let game = self.lookup_game(entry).await;
		live_card(entry, user.as_ref(), game.as_ref(), now)
	}

	/// Runs every destination job concurrently. Failures stay local to their destination;
	/// successes are recorded when `track` is set.
	async fn fan_out(
		&self,
		store: &mut StreamStore,
		index: usize,
		jobs: Vec<DestinationJob>,
		payload: Announcement,
		track: bool,
	) -> FanOutReport {
		let units = jobs.into_iter().map(|job| {
			let chat = Arc::clone(&self.chat);
			let payload = payload.clone();
			async move {
				let (edited, result) = match &job.op {
					SendOp::Create => (false, chat.send_message(&job.channel_id, &payload).await),
					SendOp::Edit(message_id) => (true, chat.edit_message(&job.channel_id, message_id, &payload).await),
				};
				JobResult {
					channel_id: job.channel_id,
					edited,
					result,
				}
			}
		});

		let mut report = FanOutReport::default();
		for JobResult {
			channel_id,
			edited,
			result,
		} in join_all(units).await
		{
			match result {
				Ok(message_id) => {
					if edited {
						report.edited += 1;
						metrics::counter!("streamcast_messages_sent_total", "op" => "edit").increment(1);
					} else {
						report.created += 1;
						metrics::counter!("streamcast_messages_sent_total", "op" => "create").increment(1);
					}
					if track {
						let source_id = store.entry(index).map(|e| e.source_id.clone()).unwrap_or_default();
						log_persist(
							store.record_message(index, &channel_id, message_id).await,
							&source_id,
							"record_message",
						);
					}
				}
				Err(e) => {
					report.failed += 1;
					metrics::counter!("streamcast_message_failures_total").increment(1);
					warn!(channel_id = %channel_id, edited, error = %e, "announcement delivery failed");
				}
			}
		}

		debug!(
			created = report.created,
			edited = report.edited,
			failed = report.failed,
			"fan-out finished"
		);
		report
	}
}
