#![forbid(unsafe_code)]

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use crate::FeedHub;

pub const DEFAULT_HUB_URL: &str = "https://pubsubhubbub.appspot.com/subscribe";
const FEED_TOPIC_BASE: &str = "https://www.youtube.com/xml/feeds/videos.xml?channel_id=";

pub fn topic_url(channel_id: &str) -> String {
	format!("{FEED_TOPIC_BASE}{}", urlencoding::encode(channel_id))
}

/// Subscribes channel feeds at the WebSub hub. Verification is asynchronous: the hub
/// calls back `callback` with a `hub.challenge` later.
#[derive(Clone)]
pub struct WebSubClient {
	http: reqwest::Client,
	hub_url: String,
	callback: String,
	lease_seconds: u64,
}

impl WebSubClient {
	pub fn new(hub_url: impl Into<String>, callback: impl Into<String>, lease_seconds: u64) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent("streamcast/0.x (websub)")
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			hub_url: hub_url.into(),
			callback: callback.into(),
			lease_seconds,
		})
	}

	fn form_params(&self, channel_id: &str) -> [(&'static str, String); 5] {
		[
			("hub.callback", self.callback.clone()),
			("hub.mode", "subscribe".to_string()),
			("hub.topic", topic_url(channel_id)),
			("hub.lease_seconds", self.lease_seconds.to_string()),
			("hub.verify", "async".to_string()),
		]
	}
}

#[async_trait]
impl FeedHub for WebSubClient {
	async fn subscribe(&self, channel_id: &str) -> anyhow::Result<()> {
		let resp = self
			.http
			.post(&self.hub_url)
			.form(&self.form_params(channel_id))
			.send()
			.await
			.context("websub subscribe send")?;

		let status = resp.status();
		if !status.is_success() {
			let body = resp.text().await.unwrap_or_default();
			metrics::counter!("streamcast_websub_subscribe_failures_total").increment(1);
			anyhow::bail!("websub subscribe rejected (channel_id={channel_id}): status={status} body={body}");
		}

		metrics::counter!("streamcast_websub_subscribe_total").increment(1);
		info!(channel_id, lease_seconds = self.lease_seconds, "requested websub subscription");
		Ok(())
	}
}
