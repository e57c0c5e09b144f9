#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use streamcast_domain::{ChannelId, MessageId, Platform, StreamEntry};
use tracing::debug;

/// Writes the full set of entries back to durable storage. May block; the store runs it on
/// the blocking pool.
pub trait StatePersister: Send + Sync {
	fn persist(&self, entries: &[StreamEntry]) -> anyhow::Result<()>;
}

/// In-memory registry of monitored sources.
///
/// Every mutator persists the whole registry before returning. Callers share the store
/// behind one `tokio::sync::Mutex` and keep it locked for a whole
/// read-decide-mutate-dispatch sequence.
pub struct StreamStore {
	entries: Vec<StreamEntry>,
	persister: Arc<dyn StatePersister>,
}

impl StreamStore {
	pub fn new(entries: Vec<StreamEntry>, persister: Arc<dyn StatePersister>) -> Self {
		Self { entries, persister }
	}

	pub fn entries(&self) -> &[StreamEntry] {
		&self.entries
	}

	pub fn entry(&self, index: usize) -> Option<&StreamEntry> {
		self.entries.get(index)
	}

	/// Linear scan; `None` means the source is not monitored.
	pub fn find_entry(&self, identifier: &str, platform: Platform) -> Option<usize> {
		self.entries.iter().position(|e| e.matches(identifier, platform))
	}

	/// Source ids of every entry on `platform`.
	pub fn source_ids(&self, platform: Platform) -> Vec<String> {
		self.entries
			.iter()
			.filter(|e| e.platform == platform)
			.map(|e| e.source_id.clone())
			.collect()
	}

	/// Tracked messages stay until a new announcement replaces them.
	pub async fn set_live(&mut self, index: usize, stream_id: Option<String>) -> anyhow::Result<()> {
		let entry = self.entry_mut(index)?;
		entry.is_live = true;
		entry.current_stream_id = stream_id;
		self.persist().await
	}

	pub async fn set_offline(&mut self, index: usize, at: i64) -> anyhow::Result<()> {
		let entry = self.entry_mut(index)?;
		entry.is_live = false;
		entry.last_offline = at;
		self.persist().await
	}

	pub async fn set_content(
		&mut self,
		index: usize,
		title: impl Into<String>,
		category_id: impl Into<String>,
		category_name: impl Into<String>,
	) -> anyhow::Result<()> {
		let entry = self.entry_mut(index)?;
		entry.title = title.into();
		entry.category_id = category_id.into();
		entry.category_name = category_name.into();
		self.persist().await
	}

	pub async fn record_message(&mut self, index: usize, channel_id: &ChannelId, message_id: MessageId) -> anyhow::Result<()> {
		let entry = self.entry_mut(index)?;
		if !entry.set_tracked_message(channel_id, message_id) {
			anyhow::bail!("channel {channel_id} is not a destination of entry {index}");
		}
		self.persist().await
	}

	pub async fn record_video(&mut self, index: usize, video_id: &str, limit: usize) -> anyhow::Result<()> {
		let entry = self.entry_mut(index)?;
		entry.remember_video(video_id, limit);
		self.persist().await
	}

	fn entry_mut(&mut self, index: usize) -> anyhow::Result<&mut StreamEntry> {
		self.entries
			.get_mut(index)
			.with_context(|| format!("no stream entry at index {index}"))
	}

	async fn persist(&self) -> anyhow::Result<()> {
		let persister = Arc::clone(&self.persister);
		let entries = self.entries.clone();
		tokio::task::spawn_blocking(move || persister.persist(&entries))
			.await
			.context("persist task failed")?
			.context("persist stream state")?;
		metrics::counter!("streamcast_state_persist_total").increment(1);
		debug!(entries = self.entries.len(), "stream state persisted");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use streamcast_domain::Destination;

	use super::*;

	#[derive(Default)]
	struct Snapshots(Mutex<Vec<Vec<StreamEntry>>>);

	impl StatePersister for Snapshots {
		fn persist(&self, entries: &[StreamEntry]) -> anyhow::Result<()> {
			self.0.lock().unwrap().push(entries.to_vec());
			Ok(())
		}
	}

	fn store() -> (StreamStore, Arc<Snapshots>) {
		let mut twitch = StreamEntry::new(Platform::Twitch, "1234", "PaintBrushPuke");
		twitch.destinations = vec![Destination::new(ChannelId::new("c1").unwrap())];
		let youtube = StreamEntry::new(Platform::YouTube, "UCabc", "Paint");
		let snaps = Arc::new(Snapshots::default());
		(StreamStore::new(vec![twitch, youtube], snaps.clone()), snaps)
	}

	#[test]
	fn lookup_respects_platform() {
		let (store, _) = store();
		assert_eq!(store.find_entry("1234", Platform::Twitch), Some(0));
		assert_eq!(store.find_entry("paintbrushpuke", Platform::Twitch), Some(0));
		assert_eq!(store.find_entry("UCabc", Platform::YouTube), Some(1));
		assert_eq!(store.find_entry("UCabc", Platform::Twitch), None);
		assert_eq!(store.find_entry("nobody", Platform::YouTube), None);
	}

	#[tokio::test]
	async fn every_mutation_persists() {
		let (mut store, snaps) = store();
		let c1 = ChannelId::new("c1").unwrap();

		store.set_live(0, Some("s1".to_string())).await.unwrap();
		store.record_message(0, &c1, MessageId::new("m1").unwrap()).await.unwrap();
		store.set_content(0, "title", "42", "Chess").await.unwrap();
		store.set_offline(0, 99).await.unwrap();
		store.record_video(1, "v1", 10).await.unwrap();

		let snaps = snaps.0.lock().unwrap();
		assert_eq!(snaps.len(), 5);
		let last = snaps.last().unwrap();
		assert!(!last[0].is_live);
		assert_eq!(last[0].last_offline, 99);
		assert_eq!(last[0].title, "title");
		assert_eq!(last[0].tracked_message(&c1).map(MessageId::as_str), Some("m1"));
		assert_eq!(last[1].video_ids, vec!["v1"]);
	}

	#[tokio::test]
	async fn new_session_keeps_tracked_messages() {
		let (mut store, _) = store();
		let c1 = ChannelId::new("c1").unwrap();
		store.record_message(0, &c1, MessageId::new("old").unwrap()).await.unwrap();
		store.set_live(0, None).await.unwrap();
		let entry = store.entry(0).unwrap();
		assert!(entry.is_live);
		assert_eq!(entry.tracked_message(&c1).map(MessageId::as_str), Some("old"));
	}

	#[tokio::test]
	async fn unknown_destination_is_an_error() {
		let (mut store, snaps) = store();
		let other = ChannelId::new("elsewhere").unwrap();
		assert!(store.record_message(0, &other, MessageId::new("m").unwrap()).await.is_err());
		assert!(store.set_offline(7, 0).await.is_err());
		assert!(snaps.0.lock().unwrap().is_empty());
	}
}
