#![forbid(unsafe_code)]

use anyhow::Context;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

pub const HEADER_MESSAGE_ID: &str = "Twitch-Eventsub-Message-Id";
pub const HEADER_MESSAGE_TYPE: &str = "Twitch-Eventsub-Message-Type";
pub const HEADER_MESSAGE_TIMESTAMP: &str = "Twitch-Eventsub-Message-Timestamp";
pub const HEADER_MESSAGE_SIGNATURE: &str = "Twitch-Eventsub-Message-Signature";

pub const MESSAGE_TYPE_VERIFICATION: &str = "webhook_callback_verification";
pub const MESSAGE_TYPE_NOTIFICATION: &str = "notification";
pub const MESSAGE_TYPE_REVOCATION: &str = "revocation";

/// Subscription statuses that will never deliver again and should be deleted.
pub const FAILED_STATUSES: &[&str] = &[
	"webhook_callback_verification_failed",
	"notification_failures_exceeded",
	"authorization_revoked",
	"user_removed",
	"version_removed",
];

pub const STATUS_ENABLED: &str = "enabled";

/// Subscription types this process relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSubType {
	StreamOnline,
	StreamOffline,
	ChannelUpdate,
}

impl EventSubType {
	pub const ALL: [EventSubType; 3] = [Self::StreamOnline, Self::StreamOffline, Self::ChannelUpdate];

	pub fn as_helix_type(&self) -> &'static str {
		match self {
			Self::StreamOnline => "stream.online",
			Self::StreamOffline => "stream.offline",
			Self::ChannelUpdate => "channel.update",
		}
	}

	pub fn version(&self) -> &'static str {
		match self {
			Self::StreamOnline | Self::StreamOffline => "1",
			Self::ChannelUpdate => "2",
		}
	}

	pub fn from_helix_type(s: &str) -> Option<Self> {
		match s {
			"stream.online" => Some(Self::StreamOnline),
			"stream.offline" => Some(Self::StreamOffline),
			"channel.update" => Some(Self::ChannelUpdate),
			_ => None,
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct EventSubSubscription {
	pub id: String,
	pub status: String,
	#[serde(rename = "type")]
	pub r#type: String,
}

#[derive(Debug, Deserialize)]
struct CallbackVerification {
	challenge: String,
}

/// A lightweight peek struct to cheaply inspect `subscription.type`.
#[derive(Debug, Deserialize)]
struct NotificationPeek {
	subscription: EventSubSubscription,
}

#[derive(Debug, Deserialize)]
struct WebhookNotification<TEvent> {
	event: TEvent,
}

#[derive(Debug, Deserialize)]
struct StreamOnlineEvent {
	#[serde(default)]
	id: Option<String>,
	broadcaster_user_id: String,
	broadcaster_user_login: String,
	#[serde(default)]
	started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamOfflineEvent {
	broadcaster_user_id: String,
	broadcaster_user_login: String,
}

#[derive(Debug, Deserialize)]
struct ChannelUpdateEvent {
	broadcaster_user_id: String,
	broadcaster_user_login: String,
	title: String,
	#[serde(default)]
	category_id: String,
	#[serde(default)]
	category_name: String,
}

/// Normalized live-platform transition input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEventKind {
	WentOnline {
		stream_id: Option<String>,
	},
	WentOffline,
	ContentUpdated {
		title: String,
		category_id: String,
		category_name: String,
	},
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEvent {
	pub broadcaster_id: String,
	pub broadcaster_login: String,
	pub kind: LiveEventKind,
	/// Unix seconds the event happened at.
	pub at: i64,
}

/// Extract the `challenge` of a `webhook_callback_verification` body.
pub fn parse_challenge(body: &[u8]) -> anyhow::Result<String> {
	let parsed: CallbackVerification = serde_json::from_slice(body).context("parse eventsub callback verification")?;
	Ok(parsed.challenge)
}

/// Extract the subscription block of a notification or revocation body.
pub fn parse_subscription(body: &[u8]) -> anyhow::Result<EventSubSubscription> {
	let peek: NotificationPeek = serde_json::from_slice(body).context("parse eventsub subscription peek")?;
	Ok(peek.subscription)
}

/// Parse a `notification` body into a [`LiveEvent`].
///
/// `message_at` is the delivery timestamp header (unix seconds) and `now` the receipt
/// time. Returns `Ok(None)` for subscription types this process does not handle.
pub fn parse_notification(body: &[u8], message_at: Option<i64>, now: i64) -> anyhow::Result<Option<LiveEvent>> {
	let subscription = parse_subscription(body)?;
	let Some(kind) = EventSubType::from_helix_type(&subscription.r#type) else {
		return Ok(None);
	};

	let event = match kind {
		EventSubType::StreamOnline => {
			let n: WebhookNotification<StreamOnlineEvent> =
				serde_json::from_slice(body).context("parse stream.online notification")?;
			let at = n
				.event
				.started_at
				.as_deref()
				.and_then(|ts| parse_timestamp(ts).ok())
				.or(message_at)
				.unwrap_or(now);
			LiveEvent {
				broadcaster_id: n.event.broadcaster_user_id,
				broadcaster_login: n.event.broadcaster_user_login,
				kind: LiveEventKind::WentOnline { stream_id: n.event.id },
				at,
			}
		}
		EventSubType::StreamOffline => {
			let n: WebhookNotification<StreamOfflineEvent> =
				serde_json::from_slice(body).context("parse stream.offline notification")?;
			LiveEvent {
				broadcaster_id: n.event.broadcaster_user_id,
				broadcaster_login: n.event.broadcaster_user_login,
				kind: LiveEventKind::WentOffline,
				at: now,
			}
		}
		EventSubType::ChannelUpdate => {
			let n: WebhookNotification<ChannelUpdateEvent> =
				serde_json::from_slice(body).context("parse channel.update notification")?;
			LiveEvent {
				broadcaster_id: n.event.broadcaster_user_id,
				broadcaster_login: n.event.broadcaster_user_login,
				kind: LiveEventKind::ContentUpdated {
					title: n.event.title,
					category_id: n.event.category_id,
					category_name: n.event.category_name,
				},
				at: message_at.unwrap_or(now),
			}
		}
	};

	Ok(Some(event))
}

/// RFC3339 timestamp → unix seconds.
pub fn parse_timestamp(ts: &str) -> anyhow::Result<i64> {
	let dt = chrono::DateTime::parse_from_rfc3339(ts).context("parse EventSub RFC3339 timestamp")?;
	Ok(dt.timestamp())
}

/// Check `Twitch-Eventsub-Message-Signature` (`sha256=<hex>` over id + timestamp + body).
pub fn verify_signature(secret: &str, message_id: &str, timestamp: &str, body: &[u8], signature: &str) -> bool {
	let Some(provided_hex) = signature.trim().strip_prefix("sha256=") else {
		return false;
	};
	let Ok(provided) = hex::decode(provided_hex) else {
		return false;
	};
	let Some(mac) = signed_mac(secret, message_id, timestamp, body) else {
		return false;
	};

	mac.verify_slice(&provided).is_ok()
}

/// HMAC-SHA256 of `message_id || timestamp || body`.
pub fn sign(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> Vec<u8> {
	signed_mac(secret, message_id, timestamp, body)
		.map(|mac| mac.finalize().into_bytes().to_vec())
		.unwrap_or_default()
}

fn signed_mac(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> Option<Hmac<Sha256>> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
	mac.update(message_id.as_bytes());
	mac.update(timestamp.as_bytes());
	mac.update(body);
	Some(mac)
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	const ONLINE: &str = r#"{
		"subscription": {
			"id": "f1c2a387-161a-49f9-a165-0f21d7a4e1c4",
			"type": "stream.online",
			"version": "1",
			"status": "enabled",
			"cost": 0,
			"condition": { "broadcaster_user_id": "1337" },
			"transport": { "method": "webhook", "callback": "https://example.com/notify" },
			"created_at": "2019-11-16T10:11:12.634234626Z"
		},
		"event": {
			"id": "9001",
			"broadcaster_user_id": "1337",
			"broadcaster_user_login": "cool_user",
			"broadcaster_user_name": "Cool_User",
			"type": "live",
			"started_at": "2020-10-11T10:11:12.123Z"
		}
	}"#;

	const UPDATE: &str = r#"{
		"subscription": {
			"id": "f1c2a387-161a-49f9-a165-0f21d7a4e1c4",
			"type": "channel.update",
			"version": "2",
			"status": "enabled",
			"condition": { "broadcaster_user_id": "1337" },
			"created_at": "2019-11-16T10:11:12.634234626Z"
		},
		"event": {
			"broadcaster_user_id": "1337",
			"broadcaster_user_login": "cool_user",
			"broadcaster_user_name": "Cool_User",
			"title": "Best Stream Ever",
			"language": "en",
			"category_id": "12453",
			"category_name": "Grand Theft Auto",
			"content_classification_labels": []
		}
	}"#;

	#[test]
	fn parses_stream_online_with_started_at() {
		let ev = parse_notification(ONLINE.as_bytes(), Some(1), 2).unwrap().unwrap();
		assert_eq!(ev.broadcaster_id, "1337");
		assert_eq!(ev.broadcaster_login, "cool_user");
		assert_eq!(ev.kind, LiveEventKind::WentOnline {
			stream_id: Some("9001".to_string())
		});
		assert_eq!(ev.at, parse_timestamp("2020-10-11T10:11:12.123Z").unwrap());
	}

	#[test]
	fn parses_channel_update_using_message_timestamp() {
		let ev = parse_notification(UPDATE.as_bytes(), Some(100), 200).unwrap().unwrap();
		assert_eq!(ev.at, 100);
		match ev.kind {
			LiveEventKind::ContentUpdated {
				title,
				category_id,
				category_name,
			} => {
				assert_eq!(title, "Best Stream Ever");
				assert_eq!(category_id, "12453");
				assert_eq!(category_name, "Grand Theft Auto");
			}
			other => panic!("expected ContentUpdated, got {other:?}"),
		}
	}

	#[test]
	fn offline_uses_receipt_time() {
		let body = r#"{
			"subscription": {"id": "s", "type": "stream.offline", "version": "1", "status": "enabled", "condition": {}},
			"event": {"broadcaster_user_id": "1337", "broadcaster_user_login": "cool_user", "broadcaster_user_name": "Cool_User"}
		}"#;
		let ev = parse_notification(body.as_bytes(), Some(5), 42).unwrap().unwrap();
		assert_eq!(ev.kind, LiveEventKind::WentOffline);
		assert_eq!(ev.at, 42);
	}

	#[test]
	fn unknown_subscription_type_is_skipped() {
		let body = r#"{
			"subscription": {"id": "s", "type": "channel.follow", "version": "2", "status": "enabled", "condition": {}},
			"event": {}
		}"#;
		assert!(parse_notification(body.as_bytes(), None, 0).unwrap().is_none());
	}

	#[test]
	fn malformed_body_is_an_error() {
		assert!(parse_notification(b"{not json", None, 0).is_err());
		assert!(parse_challenge(b"{}").is_err());
	}

	#[test]
	fn revocation_exposes_subscription_identity() {
		let body = r#"{"subscription":{"id":"s-9","type":"stream.offline","version":"1","status":"authorization_revoked","condition":{"broadcaster_user_id":"1337"}}}"#;
		let sub = parse_subscription(body.as_bytes()).unwrap();
		assert_eq!(sub.id, "s-9");
		assert_eq!(sub.r#type, "stream.offline");
		assert!(FAILED_STATUSES.contains(&sub.status.as_str()));
	}

	#[test]
	fn challenge_is_extracted() {
		let body = r#"{"challenge":"pogchamp-kappa-360noscope-vohiyo","subscription":{"id":"s","status":"webhook_callback_verification_pending","type":"stream.online","version":"1","condition":{}}}"#;
		assert_eq!(parse_challenge(body.as_bytes()).unwrap(), "pogchamp-kappa-360noscope-vohiyo");
	}

	#[test]
	fn signature_rejects_wrong_prefix_and_hex() {
		let sig = hex::encode(sign("s3cret", "id", "ts", b"body"));
		assert!(verify_signature("s3cret", "id", "ts", b"body", &format!("sha256={sig}")));
		assert!(verify_signature("s3cret", "id", "ts", b"body", &format!("sha256={}", sig.to_uppercase())));
		assert!(!verify_signature("s3cret", "id", "ts", b"body", &sig));
		assert!(!verify_signature("s3cret", "id", "ts", b"body", "sha256=zz"));
		assert!(!verify_signature("s3cret", "id", "ts", b"body", &format!("sha256={}", &sig[1..])));
		assert!(!verify_signature("s3cret", "id", "ts", b"body", &format!("sha256={}", &sig[..32])));
		assert!(!verify_signature("s3cret", "id", "ts", b"body", "sha256="));
		assert!(!verify_signature("other", "id", "ts", b"body", &format!("sha256={sig}")));
	}

	proptest! {
		#[test]
		fn signature_roundtrip_and_tamper(body in proptest::collection::vec(any::<u8>(), 0..256), flip in any::<usize>()) {
			let header = format!("sha256={}", hex::encode(sign("secret", "msg-1", "2023-01-01T00:00:00Z", &body)));
			prop_assert!(verify_signature("secret", "msg-1", "2023-01-01T00:00:00Z", &body, &header));

			if !body.is_empty() {
				let mut tampered = body.clone();
				let idx = flip % tampered.len();
				tampered[idx] ^= 0x01;
				prop_assert!(!verify_signature("secret", "msg-1", "2023-01-01T00:00:00Z", &tampered, &header));
			}
		}
	}
}
