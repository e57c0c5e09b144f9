#![forbid(unsafe_code)]

use streamcast_platform::youtube::parse_feed;
use tracing::{debug, warn};

use super::dispatcher::{DispatchOutcome, Dispatcher};

/// Handle one hub push: only the newest entry is considered.
pub async fn handle_feed_push(dispatcher: &Dispatcher, body: &str, now: i64) -> Option<DispatchOutcome> {
	let entries = match parse_feed(body) {
		Ok(entries) => entries,
		Err(e) => {
			metrics::counter!("streamcast_feed_malformed_total").increment(1);
			warn!(error = %e, "dropping malformed feed push");
			return None;
		}
	};

	let Some(newest) = entries.into_iter().next() else {
		debug!("feed push carried no entries");
		return None;
	};

	Some(dispatcher.handle_new_video(newest, now).await)
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use streamcast_domain::{ChannelId, Destination, Platform, StreamEntry};
	use tokio::sync::Mutex;

	use super::*;
	use crate::engine::EngineSettings;
	use crate::engine::dispatcher::FanOutReport;
	use crate::engine::fakes::{FakeChat, FakeMetadata, MemoryPersister};
	use crate::engine::store::StreamStore;

	fn push(entries: &[(&str, &str)]) -> String {
		let body: String = entries
			.iter()
			.map(|(id, published)| {
				format!(
					"<entry><yt:videoId>{id}</yt:videoId><yt:channelId>UCabc</yt:channelId><title>t</title>\
					<link rel=\"alternate\" href=\"https://www.youtube.com/watch?v={id}\"/>\
					<author><name>Paint</name></author><published>{published}</published></entry>"
				)
			})
			.collect();
		format!("<feed xmlns=\"http://www.w3.org/2005/Atom\">{body}</feed>")
	}

	fn dispatcher() -> (Dispatcher, Arc<FakeChat>) {
		let mut entry = StreamEntry::new(Platform::YouTube, "UCabc", "Paint");
		entry.destinations = vec![Destination::new(ChannelId::new("y1").unwrap())];
		let store = Arc::new(Mutex::new(StreamStore::new(
			vec![entry],
			Arc::new(MemoryPersister::default()),
		)));
		let chat = Arc::new(FakeChat::default());
		let d = Dispatcher::new(
			store,
			chat.clone(),
			Arc::new(FakeMetadata::default()),
			EngineSettings::default(),
		);
		(d, chat)
	}

	#[tokio::test]
	async fn only_newest_entry_is_considered() {
		let (d, chat) = dispatcher();
		let now = 1_714_564_800;
		let body = push(&[("new", "2024-05-01T12:00:00+00:00"), ("older", "2024-05-01T11:00:00+00:00")]);

		let outcome = handle_feed_push(&d, &body, now).await;

		assert_eq!(
			outcome,
			Some(DispatchOutcome::Dispatched(FanOutReport {
				created: 1,
				edited: 0,
				failed: 0
			}))
		);
		assert_eq!(chat.calls().len(), 1);
	}

	#[tokio::test]
	async fn malformed_or_empty_push_is_dropped() {
		let (d, chat) = dispatcher();
		assert_eq!(handle_feed_push(&d, "garbage", 0).await, None);
		assert_eq!(handle_feed_push(&d, "<feed></feed>", 0).await, None);
		assert!(chat.calls().is_empty());
	}
}
