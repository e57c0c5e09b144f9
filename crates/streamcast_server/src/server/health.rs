#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

/// Flipped once startup (credentials, reconcile, listeners) has finished.
#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

pub fn liveness() -> Response<Full<Bytes>> {
	Response::builder()
		.status(StatusCode::OK)
		.body(Full::new(Bytes::from_static(b"ok")))
		.unwrap()
}

pub fn readiness(state: &HealthState) -> Response<Full<Bytes>> {
	if state.is_ready() {
		Response::builder()
			.status(StatusCode::OK)
			.body(Full::new(Bytes::from_static(b"ready")))
			.unwrap()
	} else {
		Response::builder()
			.status(StatusCode::SERVICE_UNAVAILABLE)
			.body(Full::new(Bytes::from_static(b"not-ready")))
			.unwrap()
	}
}
