#![forbid(unsafe_code)]

use std::time::SystemTime;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{FatalSignal, SecretString};

const TOKEN_VALIDATE_URL: &str = "https://id.twitch.tv/oauth2/validate";
const TOKEN_ISSUE_URL: &str = "https://id.twitch.tv/oauth2/token";
const HELIX_BASE_URL: &str = "https://api.twitch.tv";

/// Upstream URLs (overridable for tests and mock servers).
#[derive(Debug, Clone)]
pub struct TwitchEndpoints {
	pub helix_base_url: String,
	pub token_url: String,
	pub validate_url: String,
}

impl Default for TwitchEndpoints {
	fn default() -> Self {
		Self {
			helix_base_url: HELIX_BASE_URL.to_string(),
			token_url: TOKEN_ISSUE_URL.to_string(),
			validate_url: TOKEN_VALIDATE_URL.to_string(),
		}
	}
}

#[derive(Debug, Error)]
pub enum CredentialError {
	#[error("twitch token request failed: {0}")]
	Transport(String),
	#[error("twitch token issuance rejected: status={status} body={body}")]
	IssueRejected { status: u16, body: String },
	#[error("twitch token response malformed: {0}")]
	Decode(String),
}

#[derive(Debug, Deserialize)]
struct AppTokenResponse {
	access_token: String,
}

struct AppToken {
	access_token: SecretString,
	issued_at: SystemTime,
}

/// Owns the app access token (client-credentials grant).
///
/// Every dependent call goes through [`CredentialManager::ensure_valid_token`], which
/// validates the current token upstream and reissues it once when rejected. A failed
/// reissue raises the [`FatalSignal`].
pub struct CredentialManager {
	http: reqwest::Client,
	endpoints: TwitchEndpoints,
	client_id: String,
	client_secret: SecretString,
	token: Mutex<Option<AppToken>>,
	fatal: FatalSignal,
}

impl CredentialManager {
	pub fn new(
		client_id: impl Into<String>,
		client_secret: SecretString,
		endpoints: TwitchEndpoints,
		fatal: FatalSignal,
	) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent("streamcast/0.x (oauth)")
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			endpoints,
			client_id: client_id.into(),
			client_secret,
			token: Mutex::new(None),
			fatal,
		})
	}

	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	pub fn endpoints(&self) -> &TwitchEndpoints {
		&self.endpoints
	}

	/// Requests a fresh token unconditionally and stores it.
	pub async fn issue(&self) -> Result<SecretString, CredentialError> {
		let mut guard = self.token.lock().await;
		self.issue_locked(&mut guard).await
	}

	/// Returns a token upstream currently accepts.
	pub async fn ensure_valid_token(&self) -> Result<SecretString, CredentialError> {
		let mut guard = self.token.lock().await;

		if let Some(current) = guard.as_ref() {
			let token = current.access_token.clone();
			if self.validate(&token).await? {
				return Ok(token);
			}

			let age_secs = current.issued_at.elapsed().map(|d| d.as_secs()).unwrap_or_default();
			warn!(age_secs, "twitch app token rejected by validate; reissuing");
			metrics::counter!("streamcast_twitch_token_rejected_total").increment(1);
		}

		match self.issue_locked(&mut guard).await {
			Ok(token) => Ok(token),
			Err(e) => {
				self.fatal.trigger(format!("could not obtain twitch app token: {e}"));
				Err(e)
			}
		}
	}

	async fn validate(&self, token: &SecretString) -> Result<bool, CredentialError> {
		let resp = self
			.http
			.get(&self.endpoints.validate_url)
			.header("Authorization", format!("OAuth {}", token.expose()))
			.send()
			.await
			.map_err(|e| CredentialError::Transport(e.to_string()))?;

		Ok(resp.status().is_success())
	}

	async fn issue_locked(&self, slot: &mut Option<AppToken>) -> Result<SecretString, CredentialError> {
		let resp = self
			.http
			.post(&self.endpoints.token_url)
			.form(&[
				("client_id", self.client_id.as_str()),
				("client_secret", self.client_secret.expose()),
				("grant_type", "client_credentials"),
			])
			.send()
			.await
			.map_err(|e| CredentialError::Transport(e.to_string()))?;

		let status = resp.status();
		let body = resp
			.text()
			.await
			.map_err(|e| CredentialError::Transport(e.to_string()))?;

		if !status.is_success() {
			return Err(CredentialError::IssueRejected {
				status: status.as_u16(),
				body,
			});
		}

		let parsed: AppTokenResponse = serde_json::from_str(&body).map_err(|e| CredentialError::Decode(e.to_string()))?;
		let token = SecretString::new(parsed.access_token);
		*slot = Some(AppToken {
			access_token: token.clone(),
			issued_at: SystemTime::now(),
		});

		metrics::counter!("streamcast_twitch_token_issued_total").increment(1);
		info!("issued twitch app access token");
		Ok(token)
	}
}
