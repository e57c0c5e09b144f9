#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use streamcast_domain::Platform;
use streamcast_platform::twitch::eventsub::{FAILED_STATUSES, STATUS_ENABLED};
use streamcast_platform::{CreateOutcome, EventSubType, FeedHub, SubscriptionApi, WebhookTransport};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::StreamStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
	pub deleted: usize,
	pub created: usize,
	pub already_enabled: usize,
	pub conflicts: usize,
	pub failed: usize,
}

/// Keeps one enabled EventSub subscription per (type, broadcaster).
pub struct SubscriptionManager {
	api: Arc<dyn SubscriptionApi>,
	transport: WebhookTransport,
}

impl SubscriptionManager {
	pub fn new(api: Arc<dyn SubscriptionApi>, transport: WebhookTransport) -> Self {
		Self { api, transport }
	}

	/// Delete dead subscriptions, then create whatever `broadcaster_ids` is missing.
	///
	/// Only a failure to list enabled subscriptions is an error; everything else is
	/// logged and counted.
	pub async fn reconcile_subscriptions(&self, broadcaster_ids: &[String]) -> anyhow::Result<ReconcileReport> {
		let mut report = ReconcileReport::default();

		for &status in FAILED_STATUSES {
			let dead = match self.api.list_subscriptions(status).await {
				Ok(dead) => dead,
				Err(e) => {
					warn!(status, error = %e, "listing failed subscriptions failed");
					continue;
				}
			};

			for sub in dead {
				match self.api.delete_subscription(&sub.id).await {
					Ok(()) => {
						report.deleted += 1;
						info!(id = %sub.id, kind = %sub.kind, status = %sub.status, "deleted failed subscription");
					}
					Err(e) => {
						report.failed += 1;
						warn!(id = %sub.id, error = %e, "deleting failed subscription failed");
					}
				}
			}
		}

		let enabled: HashSet<(String, String)> = self
			.api
			.list_subscriptions(STATUS_ENABLED)
			.await?
			.into_iter()
			.map(|s| (s.kind, s.broadcaster_id))
			.collect();

		for broadcaster_id in broadcaster_ids {
			for kind in EventSubType::ALL {
				if enabled.contains(&(kind.as_helix_type().to_string(), broadcaster_id.clone())) {
					report.already_enabled += 1;
					continue;
				}

				match self.api.create_subscription(kind, broadcaster_id, &self.transport).await {
					Ok(CreateOutcome::Created(sub)) => {
						report.created += 1;
						metrics::counter!("streamcast_subscriptions_created_total").increment(1);
						info!(broadcaster_id, kind = kind.as_helix_type(), id = %sub.id, "created subscription");
					}
					Ok(CreateOutcome::AlreadyExists) => {
						report.conflicts += 1;
						debug!(broadcaster_id, kind = kind.as_helix_type(), "subscription already exists");
					}
					Err(e) => {
						report.failed += 1;
						metrics::counter!("streamcast_subscription_failures_total").increment(1);
						warn!(broadcaster_id, kind = kind.as_helix_type(), error = %e, "creating subscription failed");
					}
				}
			}
		}

		info!(
			deleted = report.deleted,
			created = report.created,
			already_enabled = report.already_enabled,
			conflicts = report.conflicts,
			failed = report.failed,
			"eventsub subscriptions reconciled"
		);
		Ok(report)
	}
}

async fn snapshot_sources(store: &Mutex<StreamStore>, platform: Platform) -> Vec<String> {
	store.lock().await.source_ids(platform)
}

/// Re-runs the reconcile every `interval`. The first run is the caller's job.
pub fn spawn_twitch_reconcile(
	store: Arc<Mutex<StreamStore>>,
	manager: Arc<SubscriptionManager>,
	interval: Duration,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		loop {
			tokio::time::sleep(interval).await;
			let broadcasters = snapshot_sources(&store, Platform::Twitch).await;
			if let Err(e) = manager.reconcile_subscriptions(&broadcasters).await {
				warn!(error = %e, "periodic eventsub reconcile failed");
			}
		}
	})
}

/// Subscribes every video channel once; failures are logged and counted.
pub async fn renew_feeds(store: &Mutex<StreamStore>, hub: &dyn FeedHub) -> usize {
	let channels = snapshot_sources(store, Platform::YouTube).await;
	let mut failed = 0;
	for channel_id in &channels {
		if let Err(e) = hub.subscribe(channel_id).await {
			failed += 1;
			warn!(channel_id, error = %e, "feed subscription failed; retrying next tick");
		}
	}
	debug!(channels = channels.len(), failed, "feed subscriptions renewed");
	failed
}

/// Subscribes immediately, then again every `interval`, for the life of the process.
pub fn spawn_feed_renewal(store: Arc<Mutex<StreamStore>>, hub: Arc<dyn FeedHub>, interval: Duration) -> JoinHandle<()> {
	tokio::spawn(async move {
		loop {
			renew_feeds(&store, hub.as_ref()).await;
			tokio::time::sleep(interval).await;
		}
	})
}
