#![forbid(unsafe_code)]

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use streamcast_domain::{Announcement, ChannelId, Embed, MessageId};
use tracing::debug;

use crate::{ChatError, ChatSink, SecretString};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Serialize, PartialEq)]
struct WireMessage<'a> {
	#[serde(skip_serializing_if = "Option::is_none")]
	content: Option<&'a str>,
	embeds: Vec<WireEmbed<'a>>,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireEmbed<'a> {
	title: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	url: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	description: Option<&'a str>,
	color: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	author: Option<WireAuthor<'a>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	thumbnail: Option<WireImage<'a>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	image: Option<WireImage<'a>>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	fields: Vec<WireField<'a>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	footer: Option<WireFooter<'a>>,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireAuthor<'a> {
	name: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	url: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	icon_url: Option<&'a str>,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireImage<'a> {
	url: &'a str,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireField<'a> {
	name: &'a str,
	value: &'a str,
	inline: bool,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireFooter<'a> {
	text: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireMessageResponse {
	id: String,
}

fn embed_to_wire(e: &Embed) -> WireEmbed<'_> {
	WireEmbed {
		title: &e.title,
		url: e.url.as_deref(),
		description: e.description.as_deref(),
		color: e.colour,
		author: e.author.as_ref().map(|a| WireAuthor {
			name: &a.name,
			url: a.url.as_deref(),
			icon_url: a.icon_url.as_deref(),
		}),
		thumbnail: e.thumbnail_url.as_deref().map(|url| WireImage { url }),
		image: e.image_url.as_deref().map(|url| WireImage { url }),
		fields: e
			.fields
			.iter()
			.map(|f| WireField {
				name: &f.name,
				value: &f.value,
				inline: f.inline,
			})
			.collect(),
		footer: e.footer.as_deref().map(|text| WireFooter { text }),
	}
}

fn to_wire(message: &Announcement) -> WireMessage<'_> {
	WireMessage {
		content: message.content.as_deref(),
		embeds: message.embed.iter().map(embed_to_wire).collect(),
	}
}

/// Discord REST client posting as a bot user.
#[derive(Clone)]
pub struct DiscordClient {
	http: reqwest::Client,
	api_base: String,
	bot_token: SecretString,
}

impl DiscordClient {
	pub fn new(api_base: impl Into<String>, bot_token: SecretString) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent("DiscordBot (https://github.com/streamcast, 0.x)")
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			api_base: api_base.into().trim_end_matches('/').to_string(),
			bot_token,
		})
	}

	async fn execute(&self, req: reqwest::RequestBuilder, label: &'static str) -> Result<MessageId, ChatError> {
		let resp = req
			.header("Authorization", format!("Bot {}", self.bot_token.expose()))
			.send()
			.await
			.map_err(|e| ChatError::Transport(format!("{label}: {e}")))?;

		let status = resp.status();
		let body = resp
			.text()
			.await
			.map_err(|e| ChatError::Transport(format!("{label} read body: {e}")))?;

		if !status.is_success() {
			return Err(ChatError::Rejected {
				status: status.as_u16(),
				body,
			});
		}

		let parsed: WireMessageResponse =
			serde_json::from_str(&body).map_err(|e| ChatError::Decode(format!("{label}: {e}")))?;
		MessageId::new(parsed.id).map_err(|e| ChatError::Decode(format!("{label}: {e}")))
	}
}

#[async_trait]
impl ChatSink for DiscordClient {
	async fn send_message(&self, channel_id: &ChannelId, message: &Announcement) -> Result<MessageId, ChatError> {
		let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
		let id = self
			.execute(self.http.post(url).json(&to_wire(message)), "POST /channels/{id}/messages")
			.await?;
		debug!(channel_id = %channel_id, message_id = %id, "discord message created");
		Ok(id)
	}

	async fn edit_message(
		&self,
		channel_id: &ChannelId,
		message_id: &MessageId,
		message: &Announcement,
	) -> Result<MessageId, ChatError> {
		let url = format!("{}/channels/{}/messages/{}", self.api_base, channel_id, message_id);
		let id = self
			.execute(
				self.http.patch(url).json(&to_wire(message)),
				"PATCH /channels/{id}/messages/{id}",
			)
			.await?;
		debug!(channel_id = %channel_id, message_id = %id, "discord message edited");
		Ok(id)
	}
}

#[cfg(test)]
mod tests {
	use streamcast_domain::{EmbedAuthor, EmbedField};

	use super::*;
	use crate::test_support::MockUpstream;

	fn card() -> Announcement {
		Announcement::card(Embed {
			title: "Speedrunning".to_string(),
			url: Some("https://twitch.tv/cool_user".to_string()),
			description: None,
			colour: 0x9146ff,
			author: Some(EmbedAuthor {
				name: "Cool_User is live".to_string(),
				url: Some("https://twitch.tv/cool_user".to_string()),
				icon_url: None,
			}),
			thumbnail_url: Some("https://img/box.jpg".to_string()),
			image_url: None,
			fields: vec![EmbedField {
				name: "Category".to_string(),
				value: "Celeste".to_string(),
				inline: true,
			}],
			footer: None,
		})
	}

	#[test]
	fn wire_shape_matches_discord() {
		let json = serde_json::to_value(to_wire(&card())).unwrap();
		assert!(json.get("content").is_none());
		let embed = &json["embeds"][0];
		assert_eq!(embed["title"], "Speedrunning");
		assert_eq!(embed["color"], 0x9146ff);
		assert_eq!(embed["author"]["name"], "Cool_User is live");
		assert!(embed["author"].get("icon_url").is_none());
		assert_eq!(embed["thumbnail"]["url"], "https://img/box.jpg");
		assert!(embed.get("image").is_none());
		assert_eq!(embed["fields"][0]["inline"], true);
	}

	#[test]
	fn text_message_has_no_embeds() {
		let json = serde_json::to_value(to_wire(&Announcement::text("hello"))).unwrap();
		assert_eq!(json["content"], "hello");
		assert_eq!(json["embeds"].as_array().map(Vec::len), Some(0));
	}

	#[tokio::test]
	async fn send_and_edit_hit_expected_routes() {
		let mock = MockUpstream::spawn(|_| (200, r#"{"id":"m1","channel_id":"c1"}"#.to_string())).await;
		let client = DiscordClient::new(mock.url("/api/v10/"), SecretString::new("bot-token")).unwrap();
		let channel = ChannelId::new("c1").unwrap();

		let id = client.send_message(&channel, &card()).await.unwrap();
		assert_eq!(id.as_str(), "m1");
		client.edit_message(&channel, &id, &card()).await.unwrap();

		let reqs = mock.requests();
		assert_eq!(reqs[0].method, "POST");
		assert_eq!(reqs[0].path_and_query, "/api/v10/channels/c1/messages");
		assert_eq!(reqs[0].authorization.as_deref(), Some("Bot bot-token"));
		assert_eq!(reqs[1].method, "PATCH");
		assert_eq!(reqs[1].path_and_query, "/api/v10/channels/c1/messages/m1");
	}

	#[tokio::test]
	async fn rejection_carries_status() {
		let mock = MockUpstream::spawn(|_| (404, r#"{"message":"Unknown Message","code":10008}"#.to_string())).await;
		let client = DiscordClient::new(mock.url("/api/v10"), SecretString::new("bot-token")).unwrap();
		let channel = ChannelId::new("c1").unwrap();
		let message = MessageId::new("gone").unwrap();

		let err = client
			.edit_message(&channel, &message, &Announcement::text("x"))
			.await
			.unwrap_err();
		assert!(matches!(err, ChatError::Rejected { status: 404, .. }));
	}
}
