#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use streamcast_domain::{ChannelInfo, GameInfo, UserInfo};
use tracing::debug;
use url::Url;

use super::auth::CredentialManager;
use super::eventsub::EventSubType;
use crate::{CreateOutcome, MetadataLookup, SubscriptionApi, SubscriptionRecord, WebhookTransport};

const EVENTSUB_SUBSCRIPTIONS_PATH: &str = "/helix/eventsub/subscriptions";
const USERS_PATH: &str = "/helix/users";
const CHANNELS_PATH: &str = "/helix/channels";
const GAMES_PATH: &str = "/helix/games";

fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
	if let Some(v) = headers.get(RETRY_AFTER)
		&& let Ok(s) = v.to_str()
		&& let Ok(secs) = s.trim().parse::<u64>()
	{
		return Some(Duration::from_secs(secs));
	}

	if let Some(v) = headers.get("Ratelimit-Reset")
		&& let Ok(s) = v.to_str()
		&& let Ok(reset_unix) = s.trim().parse::<u64>()
	{
		let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
		if reset_unix > now {
			return Some(Duration::from_secs(reset_unix - now));
		}
	}

	None
}

/// One retry on 429 (honouring the reset headers) or 5xx. Anything else is returned as is.
async fn send_with_retry(req: reqwest::RequestBuilder, label: &'static str) -> anyhow::Result<reqwest::Response> {
	let retry_builder = req.try_clone();
	let resp = req.send().await.with_context(|| format!("helix {label} send"))?;
	let status = resp.status();

	if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
		let body = resp.text().await.unwrap_or_default();
		metrics::counter!("streamcast_helix_auth_failures_total").increment(1);
		anyhow::bail!("helix auth failed (status={status}) body={body}");
	}

	if status == StatusCode::TOO_MANY_REQUESTS
		&& let Some(delay) = retry_delay_from_headers(resp.headers())
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(delay).await;
		let retry_resp = retry.send().await.with_context(|| format!("helix {label} retry send"))?;
		return Ok(retry_resp);
	}

	if status.is_server_error()
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(Duration::from_millis(250)).await;
		let retry_resp = retry.send().await.with_context(|| format!("helix {label} retry send"))?;
		return Ok(retry_resp);
	}

	Ok(resp)
}

#[derive(Debug, Deserialize)]
struct HelixData<T> {
	data: Vec<T>,
	#[serde(default)]
	pagination: Option<HelixPagination>,
}

#[derive(Debug, Deserialize)]
struct HelixPagination {
	#[serde(default)]
	cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
	id: String,
	login: String,
	display_name: String,
	#[serde(default)]
	profile_image_url: String,
}

#[derive(Debug, Deserialize)]
struct HelixChannel {
	broadcaster_id: String,
	broadcaster_login: String,
	#[serde(default)]
	title: String,
	#[serde(default)]
	game_id: String,
	#[serde(default)]
	game_name: String,
}

#[derive(Debug, Deserialize)]
struct HelixGame {
	id: String,
	name: String,
	#[serde(default)]
	box_art_url: String,
}

#[derive(Debug, Deserialize)]
struct HelixSubscriptionData {
	id: String,
	status: String,
	#[serde(rename = "type")]
	r#type: String,
	#[serde(default)]
	condition: HelixSubscriptionCondition,
}

#[derive(Debug, Default, Deserialize)]
struct HelixSubscriptionCondition {
	#[serde(default)]
	broadcaster_user_id: Option<String>,
}

impl From<HelixSubscriptionData> for SubscriptionRecord {
	fn from(d: HelixSubscriptionData) -> Self {
		Self {
			id: d.id,
			status: d.status,
			kind: d.r#type,
			broadcaster_id: d.condition.broadcaster_user_id.unwrap_or_default(),
		}
	}
}

#[derive(Debug, Serialize)]
struct HelixBroadcasterCondition<'a> {
	broadcaster_user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct HelixWebhookTransport<'a> {
	method: &'static str,
	callback: &'a str,
	secret: &'a str,
}

#[derive(Debug, Serialize)]
struct HelixCreateSubscriptionRequest<'a> {
	#[serde(rename = "type")]
	r#type: &'static str,
	version: &'static str,
	condition: HelixBroadcasterCondition<'a>,
	transport: HelixWebhookTransport<'a>,
}

fn non_empty(s: String) -> Option<String> {
	if s.is_empty() { None } else { Some(s) }
}

/// Helix REST client authenticated with the shared app token.
///
/// Every call asks the [`CredentialManager`] for a validated token first.
#[derive(Clone)]
pub struct HelixClient {
	http: reqwest::Client,
	base_url: Url,
	credentials: Arc<CredentialManager>,
}

impl HelixClient {
	pub fn new(credentials: Arc<CredentialManager>) -> anyhow::Result<Self> {
		let base_url = Url::parse(&credentials.endpoints().helix_base_url).context("parse helix base url")?;
		let http = reqwest::Client::builder()
			.user_agent("streamcast/0.x (helix)")
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			base_url,
			credentials,
		})
	}

	fn url(&self, path_and_query: &str) -> anyhow::Result<Url> {
		self.base_url.join(path_and_query).context("join helix url")
	}

	async fn authed(&self, req: reqwest::RequestBuilder) -> anyhow::Result<reqwest::RequestBuilder> {
		let token = self
			.credentials
			.ensure_valid_token()
			.await
			.context("obtain twitch app token")?;
		Ok(req
			.header("Client-Id", self.credentials.client_id())
			.header("Authorization", format!("Bearer {}", token.expose())))
	}

	async fn get_json<T: for<'de> Deserialize<'de>>(
		&self,
		path_and_query: &str,
		label: &'static str,
	) -> anyhow::Result<HelixData<T>> {
		let url = self.url(path_and_query)?;
		let req = self.authed(self.http.get(url)).await?;

		let resp = send_with_retry(req, label)
			.await
			.with_context(|| format!("helix {label} send"))?;

		let status = resp.status();
		let body = resp.text().await.with_context(|| format!("helix {label} read body"))?;

		if !status.is_success() {
			anyhow::bail!("helix {label} failed: status={status} body={body}");
		}

		serde_json::from_str(&body).with_context(|| format!("helix {label} parse json"))
	}

	pub async fn get_user_by_id(&self, user_id: &str) -> anyhow::Result<Option<UserInfo>> {
		let path = format!("{USERS_PATH}?id={}", urlencoding::encode(user_id));
		let page: HelixData<HelixUser> = self.get_json(&path, "GET /helix/users").await?;
		Ok(page.data.into_iter().next().map(|u| UserInfo {
			id: u.id,
			login: u.login,
			display_name: u.display_name,
			profile_image_url: non_empty(u.profile_image_url),
		}))
	}

	pub async fn get_channel(&self, broadcaster_id: &str) -> anyhow::Result<Option<ChannelInfo>> {
		let path = format!("{CHANNELS_PATH}?broadcaster_id={}", urlencoding::encode(broadcaster_id));
		let page: HelixData<HelixChannel> = self.get_json(&path, "GET /helix/channels").await?;
		Ok(page.data.into_iter().next().map(|c| ChannelInfo {
			broadcaster_id: c.broadcaster_id,
			broadcaster_login: c.broadcaster_login,
			title: c.title,
			game_id: c.game_id,
			game_name: c.game_name,
		}))
	}

	pub async fn get_game(&self, game_id: &str) -> anyhow::Result<Option<GameInfo>> {
		let path = format!("{GAMES_PATH}?id={}", urlencoding::encode(game_id));
		let page: HelixData<HelixGame> = self.get_json(&path, "GET /helix/games").await?;
		Ok(page.data.into_iter().next().map(|g| GameInfo {
			id: g.id,
			name: g.name,
			box_art_url: non_empty(g.box_art_url),
		}))
	}

	/// Lists every page of subscriptions in the given status.
	pub async fn list_all_subscriptions_by_status(&self, status: &str) -> anyhow::Result<Vec<SubscriptionRecord>> {
		let mut out: Vec<SubscriptionRecord> = Vec::new();
		let mut after: Option<String> = None;

		loop {
			let mut path = format!("{EVENTSUB_SUBSCRIPTIONS_PATH}?status={}", urlencoding::encode(status));
			if let Some(after) = after.as_deref() {
				path.push_str("&after=");
				path.push_str(&urlencoding::encode(after));
			}

			let page: HelixData<HelixSubscriptionData> =
				self.get_json(&path, "GET /helix/eventsub/subscriptions").await?;
			out.extend(page.data.into_iter().map(SubscriptionRecord::from));

			let next = page.pagination.and_then(|p| p.cursor).filter(|c| !c.is_empty());
			if next.is_none() {
				break;
			}
			after = next;
		}

		debug!(status, count = out.len(), "listed eventsub subscriptions");
		Ok(out)
	}

	pub async fn create_webhook_subscription(
		&self,
		kind: EventSubType,
		broadcaster_id: &str,
		transport: &WebhookTransport,
	) -> anyhow::Result<CreateOutcome> {
		let ty = kind.as_helix_type();
		let url = self.url(EVENTSUB_SUBSCRIPTIONS_PATH)?;

		let req = HelixCreateSubscriptionRequest {
			r#type: ty,
			version: kind.version(),
			condition: HelixBroadcasterCondition {
				broadcaster_user_id: broadcaster_id,
			},
			transport: HelixWebhookTransport {
				method: "webhook",
				callback: &transport.callback,
				secret: transport.secret.expose(),
			},
		};

		let builder = self.authed(self.http.post(url)).await?.json(&req);
		let resp = send_with_retry(builder, "POST /helix/eventsub/subscriptions")
			.await
			.with_context(|| format!("helix POST {EVENTSUB_SUBSCRIPTIONS_PATH} send (type={ty})"))?;

		let status = resp.status();
		let body = resp
			.text()
			.await
			.with_context(|| format!("helix POST {EVENTSUB_SUBSCRIPTIONS_PATH} read body (type={ty})"))?;

		if status == StatusCode::CONFLICT {
			return Ok(CreateOutcome::AlreadyExists);
		}
		if !status.is_success() {
			anyhow::bail!("helix create subscription failed (type={ty}): status={status} body={body}");
		}

		let parsed: HelixData<HelixSubscriptionData> =
			serde_json::from_str(&body).with_context(|| format!("helix create subscription parse json (type={ty})"))?;
		let record = parsed
			.data
			.into_iter()
			.next()
			.map(SubscriptionRecord::from)
			.with_context(|| format!("helix create subscription returned no data (type={ty})"))?;

		Ok(CreateOutcome::Created(record))
	}

	pub async fn delete_subscription_by_id(&self, subscription_id: &str) -> anyhow::Result<()> {
		let url = self.url(&format!(
			"{base}?id={}",
			urlencoding::encode(subscription_id),
			base = EVENTSUB_SUBSCRIPTIONS_PATH
		))?;

		let builder = self.authed(self.http.delete(url)).await?;
		let resp = send_with_retry(builder, "DELETE /helix/eventsub/subscriptions")
			.await
			.context("helix DELETE /helix/eventsub/subscriptions send")?;

		let status = resp.status();
		if status == StatusCode::NO_CONTENT || status.is_success() {
			return Ok(());
		}

		let body = resp
			.text()
			.await
			.context("helix DELETE /helix/eventsub/subscriptions read body")?;
		anyhow::bail!("helix delete subscription failed: status={status} body={body}");
	}
}

#[async_trait]
impl MetadataLookup for HelixClient {
	async fn user(&self, user_id: &str) -> anyhow::Result<Option<UserInfo>> {
		self.get_user_by_id(user_id).await
	}

	async fn channel(&self, broadcaster_id: &str) -> anyhow::Result<Option<ChannelInfo>> {
		self.get_channel(broadcaster_id).await
	}

	async fn game(&self, game_id: &str) -> anyhow::Result<Option<GameInfo>> {
		self.get_game(game_id).await
	}
}

#[async_trait]
impl SubscriptionApi for HelixClient {
	async fn list_subscriptions(&self, status: &str) -> anyhow::Result<Vec<SubscriptionRecord>> {
		self.list_all_subscriptions_by_status(status).await
	}

	async fn create_subscription(
		&self,
		kind: EventSubType,
		broadcaster_id: &str,
		transport: &WebhookTransport,
	) -> anyhow::Result<CreateOutcome> {
		self.create_webhook_subscription(kind, broadcaster_id, transport).await
	}

	async fn delete_subscription(&self, subscription_id: &str) -> anyhow::Result<()> {
		self.delete_subscription_by_id(subscription_id).await
	}
}
