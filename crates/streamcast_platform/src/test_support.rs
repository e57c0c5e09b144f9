#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

/// What the mock upstream saw for one request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
	pub method: String,
	pub path_and_query: String,
	pub authorization: Option<String>,
	pub body: String,
}

pub type Handler = Arc<dyn Fn(&SeenRequest) -> (u16, String) + Send + Sync>;

/// Tiny HTTP upstream: every request is recorded and answered by `handler`.
pub struct MockUpstream {
	pub addr: SocketAddr,
	pub seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockUpstream {
	pub async fn spawn<F>(handler: F) -> Self
	where
		F: Fn(&SeenRequest) -> (u16, String) + Send + Sync + 'static,
	{
		let handler: Handler = Arc::new(handler);
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
		let addr = listener.local_addr().expect("mock addr");
		let seen: Arc<Mutex<Vec<SeenRequest>>> = Arc::new(Mutex::new(Vec::new()));

		let seen_task = seen.clone();
		tokio::spawn(async move {
			while let Ok((stream, _)) = listener.accept().await {
				let handler = handler.clone();
				let seen = seen_task.clone();
				tokio::spawn(async move {
					let service = service_fn(move |req| handle(req, handler.clone(), seen.clone()));
					let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
				});
			}
		});

		Self { addr, seen }
	}

	pub fn url(&self, path: &str) -> String {
		format!("http://{}{}", self.addr, path)
	}

	pub fn requests(&self) -> Vec<SeenRequest> {
		self.seen.lock().expect("seen lock").clone()
	}
}

async fn handle(
	req: Request<Incoming>,
	handler: Handler,
	seen: Arc<Mutex<Vec<SeenRequest>>>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let method = req.method().to_string();
	let path_and_query = req
		.uri()
		.path_and_query()
		.map(|p| p.as_str().to_string())
		.unwrap_or_default();
	let authorization = req
		.headers()
		.get("Authorization")
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);
	let body = req.into_body().collect().await?.to_bytes();

	let seen_req = SeenRequest {
		method,
		path_and_query,
		authorization,
		body: String::from_utf8_lossy(&body).into_owned(),
	};
	let (status, body) = handler(&seen_req);
	seen.lock().expect("seen lock").push(seen_req);

	Ok(Response::builder()
		.status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
		.header("Content-Type", "application/json")
		.body(Full::new(Bytes::from(body)))
		.unwrap())
}
