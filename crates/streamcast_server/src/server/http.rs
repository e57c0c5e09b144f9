#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use streamcast_platform::twitch::eventsub::{
	HEADER_MESSAGE_ID, HEADER_MESSAGE_SIGNATURE, HEADER_MESSAGE_TIMESTAMP, HEADER_MESSAGE_TYPE, LiveEvent,
	MESSAGE_TYPE_NOTIFICATION, MESSAGE_TYPE_REVOCATION, MESSAGE_TYPE_VERIFICATION, parse_challenge,
	parse_notification, parse_subscription, parse_timestamp, verify_signature,
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::health;
use crate::context::AppContext;
use crate::engine::feed::handle_feed_push;
use crate::util::time::unix_secs_now;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Work to run after the response has been produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
	Live(LiveEvent),
	Feed(String),
}

pub struct Routed {
	pub response: Response<Full<Bytes>>,
	pub job: Option<Job>,
}

impl Routed {
	fn reply(response: Response<Full<Bytes>>) -> Self {
		Self { response, job: None }
	}

	fn accept(job: Job) -> Self {
		Self {
			response: empty(StatusCode::NO_CONTENT),
			job: Some(job),
		}
	}
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
	Response::builder().status(status).body(Full::new(Bytes::new())).unwrap()
}

fn text(body: String) -> Response<Full<Bytes>> {
	Response::builder()
		.status(StatusCode::OK)
		.header(CONTENT_TYPE, "text/plain")
		.body(Full::new(Bytes::from(body)))
		.unwrap()
}

pub async fn bind_listener(addr: SocketAddr) -> anyhow::Result<TcpListener> {
	let listener = TcpListener::bind(addr).await?;
	info!(%addr, "webhook listener bound");
	Ok(listener)
}

pub async fn run_webhook_server(listener: TcpListener, ctx: Arc<AppContext>) -> anyhow::Result<()> {
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let ctx = Arc::clone(&ctx);
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_request(req, Arc::clone(&ctx)));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "webhook connection error");
			}
		});
	}
}

async fn handle_request(req: Request<Incoming>, ctx: Arc<AppContext>) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let (parts, body) = req.into_parts();

	let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
		Ok(collected) => collected.to_bytes(),
		Err(err) => {
			warn!(error = %err, path = parts.uri.path(), "webhook body read failed");
			metrics::counter!("streamcast_webhook_body_errors_total").increment(1);
			return Ok(empty(StatusCode::BAD_REQUEST));
		}
	};

	let req = Request::from_parts(parts, body);
	let Routed { response, job } = route(&ctx, &req, unix_secs_now());
	if let Some(job) = job {
		spawn_job(ctx, job);
	}
	Ok(response)
}

fn spawn_job(ctx: Arc<AppContext>, job: Job) {
	tokio::spawn(async move {
		match job {
			Job::Live(event) => {
				let broadcaster_id = event.broadcaster_id.clone();
				let outcome = ctx.dispatcher.handle_live_event(event, unix_secs_now()).await;
				debug!(broadcaster_id, ?outcome, "live event processed");
			}
			Job::Feed(body) => {
				let outcome = handle_feed_push(&ctx.dispatcher, &body, unix_secs_now()).await;
				debug!(?outcome, "feed push processed");
			}
		}
	});
}

/// Decides the response for one fully-read request. Never touches the network.
pub fn route(ctx: &AppContext, req: &Request<Bytes>, now: i64) -> Routed {
	match req.uri().path() {
		"/healthz" | "/readyz" if req.method() != Method::GET => Routed::reply(empty(StatusCode::METHOD_NOT_ALLOWED)),
		"/healthz" => Routed::reply(health::liveness()),
		"/readyz" => Routed::reply(health::readiness(&ctx.health)),
		"/notify" => route_eventsub(ctx, req, now),
		"/video-feed" => route_feed(req),
		_ => Routed::reply(empty(StatusCode::NOT_FOUND)),
	}
}

fn route_eventsub(ctx: &AppContext, req: &Request<Bytes>, now: i64) -> Routed {
	if req.method() != Method::POST {
		return Routed::reply(empty(StatusCode::METHOD_NOT_ALLOWED));
	}

	let headers = req.headers();
	let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("");
	let message_id = header(HEADER_MESSAGE_ID);
	let message_type = header(HEADER_MESSAGE_TYPE);
	let timestamp = header(HEADER_MESSAGE_TIMESTAMP);
	let signature = header(HEADER_MESSAGE_SIGNATURE);
	let body = req.body().as_ref();

	metrics::counter!("streamcast_webhook_requests_total", "source" => "eventsub").increment(1);

	if message_id.is_empty()
		|| timestamp.is_empty()
		|| !verify_signature(ctx.webhook_secret.expose(), message_id, timestamp, body, signature)
	{
		metrics::counter!("streamcast_webhook_signature_invalid_total").increment(1);
		warn!(message_id, message_type, "rejecting eventsub request with a bad signature");
		return Routed::reply(empty(StatusCode::FORBIDDEN));
	}

	match message_type {
		MESSAGE_TYPE_VERIFICATION => match parse_challenge(body) {
			Ok(challenge) => {
				info!(message_id, "answering eventsub callback verification");
				Routed::reply(text(challenge))
			}
			Err(e) => {
				metrics::counter!("streamcast_webhook_malformed_total").increment(1);
				warn!(message_id, error = %e, "malformed eventsub verification");
				Routed::reply(empty(StatusCode::NO_CONTENT))
			}
		},
		MESSAGE_TYPE_NOTIFICATION => {
			if !ctx.first_delivery(message_id) {
				metrics::counter!("streamcast_webhook_duplicates_total").increment(1);
				debug!(message_id, "dropping redelivered eventsub notification");
				return Routed::reply(empty(StatusCode::NO_CONTENT));
			}

			match parse_notification(body, parse_timestamp(timestamp).ok(), now) {
				Ok(Some(event)) => Routed::accept(Job::Live(event)),
				Ok(None) => {
					debug!(message_id, "eventsub notification of an unhandled type");
					Routed::reply(empty(StatusCode::NO_CONTENT))
				}
				Err(e) => {
					metrics::counter!("streamcast_webhook_malformed_total").increment(1);
					warn!(message_id, error = %e, "dropping malformed eventsub notification");
					Routed::reply(empty(StatusCode::NO_CONTENT))
				}
			}
		}
		MESSAGE_TYPE_REVOCATION => {
			metrics::counter!("streamcast_subscriptions_revoked_total").increment(1);
			match parse_subscription(body) {
				Ok(sub) => warn!(id = %sub.id, kind = %sub.r#type, status = %sub.status, "eventsub subscription revoked"),
				Err(e) => warn!(message_id, error = %e, "malformed eventsub revocation"),
			}
			Routed::reply(empty(StatusCode::NO_CONTENT))
		}
		other => {
			debug!(message_id, message_type = other, "ignoring unknown eventsub message type");
			Routed::reply(empty(StatusCode::NO_CONTENT))
		}
	}
}

fn route_feed(req: &Request<Bytes>) -> Routed {
	metrics::counter!("streamcast_webhook_requests_total", "source" => "websub").increment(1);

	match *req.method() {
		Method::GET => {
			let params: HashMap<String, String> = req
				.uri()
				.query()
				.map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
				.unwrap_or_default();
			let param = |key: &str| params.get(key).map(String::as_str).unwrap_or("");

			if param("hub.mode") == "denied" {
				metrics::counter!("streamcast_feed_denied_total").increment(1);
				warn!(topic = param("hub.topic"), reason = param("hub.reason"), "feed subscription denied by hub");
				return Routed::reply(empty(StatusCode::NO_CONTENT));
			}

			match params.get("hub.challenge") {
				Some(challenge) => {
					info!(
						mode = param("hub.mode"),
						topic = param("hub.topic"),
						lease_seconds = param("hub.lease_seconds"),
						"answering feed subscription verification"
					);
					Routed::reply(text(challenge.clone()))
				}
				None => Routed::reply(empty(StatusCode::NO_CONTENT)),
			}
		}
		Method::POST => Routed::accept(Job::Feed(String::from_utf8_lossy(req.body()).into_owned())),
		_ => Routed::reply(empty(StatusCode::METHOD_NOT_ALLOWED)),
	}
}
