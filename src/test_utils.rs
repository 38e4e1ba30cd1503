use axum::{
    Json, Router,
    body::Body,
    extract::{RawQuery, State},
    http::{Request, StatusCode},
    response::Response,
};
use chrono::{Local, TimeDelta};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceExt;

use crate::gate::{GateSnapshot, GateState};
use crate::rate_limit::RateLimiter;
use crate::state::AppState;
use crate::upstream::UpstreamClient;

pub const TEST_MODEL: &str = "test-model";

struct StubState {
    status: StatusCode,
    delay: Duration,
    body: Value,
    hits: AtomicUsize,
    last_body: Mutex<Option<Value>>,
    last_query: Mutex<Option<String>>,
}

// fake upstream, fixed status and body for every request
pub struct StubUpstream {
    addr: std::net::SocketAddr,
    state: Arc<StubState>,
}

impl StubUpstream {
    pub async fn spawn(status: StatusCode, body: Value) -> Self {
        Self::spawn_delayed(status, body, Duration::ZERO).await
    }

    // answers only after `delay`
    pub async fn spawn_delayed(status: StatusCode, body: Value, delay: Duration) -> Self {
        let state = Arc::new(StubState {
            status,
            delay,
            body,
            hits: AtomicUsize::new(0),
            last_body: Mutex::new(None),
            last_query: Mutex::new(None),
        });

        let app = Router::new()
            .fallback(stub_handler)
            .with_state(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1beta/models", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<Value> {
        self.state.last_body.lock().unwrap().clone()
    }

    // value of the `key` query parameter on the last call
    pub fn last_key(&self) -> Option<String> {
        let query = self.state.last_query.lock().unwrap().clone()?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("key="))
            .map(str::to_string)
    }
}

async fn stub_handler(
    State(state): State<Arc<StubState>>,
    RawQuery(query): RawQuery,
    body: axum::body::Bytes,
) -> (StatusCode, Json<Value>) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_body.lock().unwrap() = serde_json::from_slice(&body).ok();
    *state.last_query.lock().unwrap() = query;
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    (state.status, Json(state.body.clone()))
}

pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/v1beta/models", addr)
}

fn locked_gate() -> GateSnapshot {
    GateSnapshot {
        state: GateState::Locked,
        remaining: None,
        target: Local::now() + TimeDelta::days(1),
    }
}

fn build_state(
    base_url: &str,
    api_key: Option<&str>,
    gate: GateSnapshot,
    upstream_timeout: Duration,
) -> Arc<AppState> {
    let (_tx, rx) = watch::channel(gate);
    Arc::new(AppState {
        upstream: UpstreamClient::new(base_url, TEST_MODEL, upstream_timeout).unwrap(),
        api_key: api_key.map(str::to_string),
        rate_limiter: Arc::new(RateLimiter::new(6, Duration::from_secs(30))),
        gate: rx,
    })
}

pub fn test_state(base_url: &str, api_key: Option<&str>) -> Arc<AppState> {
    build_state(base_url, api_key, locked_gate(), Duration::from_secs(5))
}

pub fn test_state_with_timeout(base_url: &str, upstream_timeout: Duration) -> Arc<AppState> {
    build_state(base_url, Some("k"), locked_gate(), upstream_timeout)
}

pub fn test_state_with_gate(gate: GateSnapshot) -> Arc<AppState> {
    build_state("http://127.0.0.1:9/v1beta/models", Some("k"), gate, Duration::from_secs(5))
}

pub async fn send(state: &Arc<AppState>, request: Request<Body>) -> Response {
    crate::router(Arc::clone(state)).oneshot(request).await.unwrap()
}

pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

pub async fn post_dream(state: &Arc<AppState>, client_ip: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/dream")
        .header("content-type", "application/json")
        .header("x-forwarded-for", client_ip)
        .body(Body::from(body.to_string()))
        .unwrap();
    read_json(send(state, request).await).await
}

pub async fn get_json(state: &Arc<AppState>, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    read_json(send(state, request).await).await
}

pub async fn serve_app(state: Arc<AppState>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = crate::router(state).into_make_service_with_connect_info::<std::net::SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
