#![forbid(unsafe_code)]


use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::{Deserialize, Serialize};
use streamcast_domain::StreamEntry;
use streamcast_platform::SecretString;
use streamcast_platform::discord::DEFAULT_API_BASE;
use streamcast_platform::twitch::TwitchEndpoints;
use streamcast_platform::youtube::DEFAULT_HUB_URL;
use tracing::{debug, info, warn};

use crate::engine::EngineSettings;
use crate::engine::store::StatePersister;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Default config path: `~/.streamcast/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".streamcast").join("config.toml"))
}

/// On-disk document. Rewritten in full whenever stream state changes, so every
/// section round-trips exactly as read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
	#[serde(default)]
	pub secrets: FileSecrets,

	#[serde(default)]
	pub server: FileServerSettings,

	#[serde(default)]
	pub engine: FileEngineSettings,

	#[serde(default, skip_serializing_if = "FileEndpoints::is_empty")]
	pub endpoints: FileEndpoints,

	#[serde(default)]
	pub streams: Vec<StreamEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSecrets {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub discord_bot_token: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub twitch_client_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub twitch_client_secret: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileServerSettings {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub public_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bind: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEngineSettings {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub offline_debounce_secs: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub video_freshness_secs: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub video_history_limit: Option<usize>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub feed_lease_secs: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub feed_renewal_secs: Option<u64>,
	/// 0 disables the periodic reconcile.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub twitch_reconcile_secs: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub event_dedup_capacity: Option<usize>,
}

/// Upstream base URLs; only set when pointing at something other than production.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEndpoints {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub discord_api_base: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub websub_hub_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub twitch_helix_base_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub twitch_token_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub twitch_validate_url: Option<String>,
}

impl FileEndpoints {
	fn is_empty(&self) -> bool {
		self == &Self::default()
	}
}

/// Runtime config: file values with env overrides applied.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub secrets: Secrets,
	pub server: ServerSettings,
	pub engine: EngineSettings,
	pub endpoints: Endpoints,
}

#[derive(Debug, Clone, Default)]
pub struct Secrets {
	pub discord_bot_token: Option<SecretString>,
	pub twitch_client_id: Option<String>,
	pub twitch_client_secret: Option<SecretString>,
	/// Shared secret for EventSub signatures.
	pub webhook_secret: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Externally reachable base URL; webhook callbacks hang off it.
	pub public_url: Option<String>,
	pub bind: String,
	pub metrics_bind: Option<String>,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			public_url: None,
			bind: DEFAULT_BIND.to_string(),
			metrics_bind: None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct Endpoints {
	pub discord_api_base: String,
	pub websub_hub_url: String,
	pub twitch: TwitchEndpoints,
}

impl Default for Endpoints {
	fn default() -> Self {
		Self {
			discord_api_base: DEFAULT_API_BASE.to_string(),
			websub_hub_url: DEFAULT_HUB_URL.to_string(),
			twitch: TwitchEndpoints::default(),
		}
	}
}

/// Everything startup cannot proceed without.
#[derive(Debug, Clone)]
pub struct RequiredSettings {
	pub discord_bot_token: SecretString,
	pub twitch_client_id: String,
	pub twitch_client_secret: SecretString,
	pub webhook_secret: SecretString,
	pub public_url: String,
}

impl RequiredSettings {
	pub fn notify_callback(&self) -> String {
		format!("{}/notify", self.public_url)
	}

	pub fn feed_callback(&self) -> String {
		format!("{}/video-feed", self.public_url)
	}
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ServerConfig {
	pub fn from_file(file: &ConfigDocument) -> Self {
		let defaults = EngineSettings::default();
		let e = &file.engine;
		let engine = EngineSettings {
			default_offline_debounce_secs: e
				.offline_debounce_secs
				.unwrap_or(defaults.default_offline_debounce_secs),
			video_freshness_secs: e.video_freshness_secs.unwrap_or(defaults.video_freshness_secs),
			video_history_limit: e
				.video_history_limit
				.filter(|v| *v > 0)
				.unwrap_or(defaults.video_history_limit),
			feed_lease_secs: e.feed_lease_secs.filter(|v| *v > 0).unwrap_or(defaults.feed_lease_secs),
			feed_renewal_interval: e
				.feed_renewal_secs
				.filter(|v| *v > 0)
				.map(Duration::from_secs)
				.unwrap_or(defaults.feed_renewal_interval),
			twitch_reconcile_interval: match e.twitch_reconcile_secs {
				Some(0) => None,
				Some(secs) => Some(Duration::from_secs(secs)),
				None => defaults.twitch_reconcile_interval,
			},
			event_dedup_capacity: e
				.event_dedup_capacity
				.filter(|v| *v > 0)
				.unwrap_or(defaults.event_dedup_capacity),
		};

		let ep = &file.endpoints;
		let twitch_defaults = TwitchEndpoints::default();
		let endpoints = Endpoints {
			discord_api_base: non_empty(ep.discord_api_base.clone()).unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
			websub_hub_url: non_empty(ep.websub_hub_url.clone()).unwrap_or_else(|| DEFAULT_HUB_URL.to_string()),
			twitch: TwitchEndpoints {
				helix_base_url: non_empty(ep.twitch_helix_base_url.clone()).unwrap_or(twitch_defaults.helix_base_url),
				token_url: non_empty(ep.twitch_token_url.clone()).unwrap_or(twitch_defaults.token_url),
				validate_url: non_empty(ep.twitch_validate_url.clone()).unwrap_or(twitch_defaults.validate_url),
			},
		};

		Self {
			secrets: Secrets {
				discord_bot_token: non_empty(file.secrets.discord_bot_token.clone()).map(SecretString::new),
				twitch_client_id: non_empty(file.secrets.twitch_client_id.clone()),
				twitch_client_secret: non_empty(file.secrets.twitch_client_secret.clone()).map(SecretString::new),
				webhook_secret: non_empty(file.secrets.webhook_secret.clone()).map(SecretString::new),
			},
			server: ServerSettings {
				public_url: non_empty(file.server.public_url.clone()).map(|u| u.trim_end_matches('/').to_string()),
				bind: non_empty(file.server.bind.clone()).unwrap_or_else(|| DEFAULT_BIND.to_string()),
				metrics_bind: non_empty(file.server.metrics_bind.clone()),
			},
			engine,
			endpoints,
		}
	}

	/// Fails on the first missing credential or URL.
	pub fn require(&self) -> anyhow::Result<RequiredSettings> {
		let discord_bot_token = self
			.secrets
			.discord_bot_token
			.clone()
			.ok_or_else(|| anyhow!("missing secrets.discord_bot_token"))?;
		let twitch_client_id = self
			.secrets
			.twitch_client_id
			.clone()
			.ok_or_else(|| anyhow!("missing secrets.twitch_client_id"))?;
		let twitch_client_secret = self
			.secrets
			.twitch_client_secret
			.clone()
			.ok_or_else(|| anyhow!("missing secrets.twitch_client_secret"))?;
		let webhook_secret = self
			.secrets
			.webhook_secret
			.clone()
			.ok_or_else(|| anyhow!("missing secrets.webhook_secret"))?;
		let public_url = self
			.server
			.public_url
			.clone()
			.ok_or_else(|| anyhow!("missing server.public_url"))?;

		if !public_url.starts_with("https://") && !public_url.starts_with("http://") {
			return Err(anyhow!("server.public_url must be an http(s) URL: {public_url}"));
		}

		Ok(RequiredSettings {
			discord_bot_token,
			twitch_client_id,
			twitch_client_secret,
			webhook_secret,
			public_url,
		})
	}
}

/// Rejects entries that would make lookups ambiguous.
pub fn validate_streams(streams: &[StreamEntry]) -> anyhow::Result<()> {
	let mut ids = HashSet::new();
	let mut names = HashSet::new();
	for entry in streams {
		if entry.source_id.trim().is_empty() {
			return Err(anyhow!("stream {:?} has an empty source_id", entry.name));
		}
		if !ids.insert((entry.platform, entry.source_id.clone())) {
			return Err(anyhow!("duplicate {} stream id {}", entry.platform, entry.source_id));
		}
		if !entry.name.is_empty() && !names.insert((entry.platform, entry.name.to_ascii_lowercase())) {
			return Err(anyhow!("duplicate {} stream name {}", entry.platform, entry.name));
		}
		if entry.destinations.is_empty() {
			warn!(platform = %entry.platform, source_id = %entry.source_id, "stream has no destinations");
		}
	}
	Ok(())
}

pub fn read_document(path: &Path) -> anyhow::Result<Option<ConfigDocument>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let doc: ConfigDocument = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(doc))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

/// Writes the whole document via a temp file and rename so readers never see a partial file.
pub fn save_document(path: &Path, doc: &ConfigDocument) -> anyhow::Result<()> {
	if let Some(parent) = path.parent()
		&& !parent.as_os_str().is_empty()
	{
		fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
	}

	let rendered = toml::to_string_pretty(doc).context("serialize config")?;
	let tmp = path.with_extension("toml.tmp");
	fs::write(&tmp, rendered).with_context(|| format!("write {}", tmp.display()))?;
	fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
	debug!(path = %path.display(), "config saved");
	Ok(())
}

/// Generates a webhook secret into the document when it has none. Returns whether it did.
pub fn ensure_webhook_secret(doc: &mut ConfigDocument) -> bool {
	if non_empty(doc.secrets.webhook_secret.clone()).is_some() {
		return false;
	}
	doc.secrets.webhook_secret = Some(uuid::Uuid::new_v4().simple().to_string());
	true
}

/// Overrides from `STREAMCAST_*` variables. `lookup` is `std::env::var` in production.
pub fn apply_env_overrides(cfg: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
	let get = |key: &str| non_empty(lookup(key));

	if let Some(v) = get("STREAMCAST_DISCORD_BOT_TOKEN") {
		cfg.secrets.discord_bot_token = Some(SecretString::new(v));
		info!("secrets: discord_bot_token overridden by env");
	}

	if let Some(v) = get("STREAMCAST_TWITCH_CLIENT_ID") {
		cfg.secrets.twitch_client_id = Some(v);
		info!("secrets: twitch_client_id overridden by env");
	}

	if let Some(v) = get("STREAMCAST_TWITCH_CLIENT_SECRET") {
		cfg.secrets.twitch_client_secret = Some(SecretString::new(v));
		info!("secrets: twitch_client_secret overridden by env");
	}

	if let Some(v) = get("STREAMCAST_WEBHOOK_SECRET") {
		cfg.secrets.webhook_secret = Some(SecretString::new(v));
		info!("secrets: webhook_secret overridden by env");
	}

	if let Some(v) = get("STREAMCAST_PUBLIC_URL") {
		cfg.server.public_url = Some(v.trim_end_matches('/').to_string());
		info!("server config: public_url overridden by env");
	}

	if let Some(v) = get("STREAMCAST_BIND") {
		cfg.server.bind = v;
		info!("server config: bind overridden by env");
	}

	if let Some(v) = get("STREAMCAST_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = get("STREAMCAST_OFFLINE_DEBOUNCE_SECS")
		&& let Ok(secs) = v.parse::<u64>()
	{
		cfg.engine.default_offline_debounce_secs = secs;
		info!(secs, "engine config: offline_debounce_secs overridden by env");
	}
}

/// Loaded document plus the effective runtime view of it.
#[derive(Debug)]
pub struct LoadedConfig {
	pub path: PathBuf,
	pub document: ConfigDocument,
	pub config: ServerConfig,
}

/// Reads `path`, fills in a webhook secret if needed, and applies env overrides.
///
/// A missing file is treated as an empty document; `require` decides whether that is fatal.
pub fn load_config(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<LoadedConfig> {
	let mut document = read_document(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	validate_streams(&document.streams).with_context(|| format!("invalid streams in {}", path.display()))?;

	let mut config = ServerConfig::from_file(&document);
	apply_env_overrides(&mut config, lookup);

	if config.secrets.webhook_secret.is_none() && ensure_webhook_secret(&mut document) {
		save_document(path, &document).context("persist generated webhook secret")?;
		config.secrets.webhook_secret = non_empty(document.secrets.webhook_secret.clone()).map(SecretString::new);
		info!(path = %path.display(), "generated and saved a new webhook secret");
	}

	Ok(LoadedConfig {
		path: path.to_path_buf(),
		document,
		config,
	})
}

/// Saves stream state back into the config file it was loaded from.
///
/// Only the `[[streams]]` section changes; secrets are written exactly as they were read.
pub struct ConfigFilePersister {
	path: PathBuf,
	document: Mutex<ConfigDocument>,
}

impl ConfigFilePersister {
	pub fn new(path: PathBuf, document: ConfigDocument) -> Self {
		Self {
			path,
			document: Mutex::new(document),
		}
	}
}

impl StatePersister for ConfigFilePersister {
	fn persist(&self, entries: &[StreamEntry]) -> anyhow::Result<()> {
		let mut doc = self
			.document
			.lock()
			.map_err(|_| anyhow!("config document lock poisoned"))?;
		doc.streams = entries.to_vec();
		save_document(&self.path, &doc)
	}
}
