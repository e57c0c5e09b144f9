#![forbid(unsafe_code)]

mod config;
mod context;
mod engine;
mod server;
mod util;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use streamcast_domain::Platform;
use streamcast_platform::discord::DiscordClient;
use streamcast_platform::twitch::{CredentialManager, HelixClient};
use streamcast_platform::youtube::WebSubClient;
use streamcast_platform::{FatalSignal, WebhookTransport};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ConfigFilePersister;
use crate::context::AppContext;
use crate::engine::dispatcher::Dispatcher;
use crate::engine::store::StreamStore;
use crate::engine::subscriptions::{SubscriptionManager, spawn_feed_renewal, spawn_twitch_reconcile};
use crate::server::health::HealthState;
use crate::server::http::{bind_listener, run_webhook_server};

struct Args {
	config: Option<PathBuf>,
	bind: Option<String>,
}

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: streamcast_server [--config path] [--bind host:port]\n\
\n\
Options:\n\
\t--config  Config file (default: ~/.streamcast/config.toml)\n\
\t--bind    Webhook listener address (default: {})\n\
\t--help    Show this help\n\
",
		config::DEFAULT_BIND
	);
	std::process::exit(2)
}

fn parse_args() -> Args {
	let mut args = Args { config: None, bind: None };

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" | "-c" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(PathBuf::from(v));
			}
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				args.bind = Some(v);
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,streamcast_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("streamcast_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => config::default_config_path()?,
	};
	let loaded = config::load_config(&config_path, |key| std::env::var(key).ok())?;
	info!(
		path = %config_path.display(),
		streams = loaded.document.streams.len(),
		"loaded config (toml + env overrides)"
	);

	let mut cfg = loaded.config;
	if let Some(bind) = args.bind {
		cfg.server.bind = bind;
	}
	let required = cfg.require().context("incomplete configuration")?;

	init_metrics(cfg.server.metrics_bind.as_deref());

	let bind_addr: SocketAddr = cfg
		.server
		.bind
		.parse()
		.with_context(|| format!("invalid bind address {} (expected host:port)", cfg.server.bind))?;

	let health = HealthState::new();
	let fatal = FatalSignal::new();

	let credentials = Arc::new(CredentialManager::new(
		required.twitch_client_id.clone(),
		required.twitch_client_secret.clone(),
		cfg.endpoints.twitch.clone(),
		fatal.clone(),
	)?);
	credentials.issue().await.context("initial twitch app token")?;

	let helix = Arc::new(HelixClient::new(Arc::clone(&credentials))?);
	let discord = Arc::new(DiscordClient::new(
		cfg.endpoints.discord_api_base.clone(),
		required.discord_bot_token.clone(),
	)?);
	let hub = Arc::new(WebSubClient::new(
		cfg.endpoints.websub_hub_url.clone(),
		required.feed_callback(),
		cfg.engine.feed_lease_secs,
	)?);

	let persister = Arc::new(ConfigFilePersister::new(loaded.path.clone(), loaded.document.clone()));
	let store = StreamStore::new(loaded.document.streams.clone(), persister);
	info!(
		streams = store.entries().len(),
		live = store.entries().iter().filter(|e| e.is_live).count(),
		"stream state restored"
	);
	let store = Arc::new(Mutex::new(store));

	let dispatcher = Arc::new(Dispatcher::new(
		Arc::clone(&store),
		discord,
		helix.clone(),
		cfg.engine.clone(),
	));
	let ctx = Arc::new(AppContext::new(
		dispatcher,
		required.webhook_secret.clone(),
		health.clone(),
	));

	// Upstream verifies callbacks while subscriptions are created, so listen first.
	let listener = bind_listener(bind_addr).await?;
	let mut server = tokio::spawn(run_webhook_server(listener, ctx));

	let manager = Arc::new(SubscriptionManager::new(
		helix,
		WebhookTransport {
			callback: required.notify_callback(),
			secret: required.webhook_secret.clone(),
		},
	));
	let broadcasters = store.lock().await.source_ids(Platform::Twitch);
	if let Err(e) = manager.reconcile_subscriptions(&broadcasters).await {
		warn!(error = %e, "initial eventsub reconcile failed");
	}
	if let Some(interval) = cfg.engine.twitch_reconcile_interval {
		spawn_twitch_reconcile(Arc::clone(&store), manager, interval);
	}
	spawn_feed_renewal(Arc::clone(&store), hub, cfg.engine.feed_renewal_interval);

	health.mark_ready();
	info!(bind = %bind_addr, public_url = %required.public_url, "streamcast_server ready");

	tokio::select! {
		reason = fatal.triggered() => Err(anyhow!("cannot continue: {reason}")),
		res = &mut server => match res {
			Ok(Ok(())) => Ok(()),
			Ok(Err(e)) => Err(e.context("webhook server stopped")),
			Err(e) => Err(anyhow!(e).context("webhook server task failed")),
		},
		_ = tokio::signal::ctrl_c() => {
			info!("shutting down");
			Ok(())
		}
	}
}
