use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method},
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

use crate::error::ProxyError;
use crate::metrics::{RATE_LIMITED, RATE_LIMITER_ENTRIES, REQUEST_TOTAL};
use crate::models::{GenerationRequest, UpstreamPayload};
use crate::state::AppState;

// Bodies are a single short prompt; anything bigger is rejected.
const MAX_BODY_BYTES: usize = 64 * 1024;

// Shared bucket for clients we cannot identify
pub const UNKNOWN_CLIENT: &str = "unknown";

// first X-Forwarded-For entry, then socket address, then UNKNOWN_CLIENT
pub fn client_identity(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    match (forwarded, remote) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => UNKNOWN_CLIENT.to_string(),
    }
}

// POST /api/dream - every method is routed here so the 405 carries our body
pub async fn dream_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Value>, ProxyError> {
    if request.method() != Method::POST {
        return Err(ProxyError::MethodNotAllowed);
    }
    REQUEST_TOTAL.inc();

    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(request.headers(), remote);

    let allowed = state.rate_limiter.check(&identity, Instant::now());
    RATE_LIMITER_ENTRIES.set(state.rate_limiter.len() as f64);
    if !allowed {
        RATE_LIMITED.inc();
        warn!(client = %identity, "rate limit exceeded");
        return Err(ProxyError::RateLimited);
    }

    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|_| ProxyError::InvalidInput)?;
    let generation = GenerationRequest::from_body(&body)?;

    let Some(api_key) = state.api_key.as_deref() else {
        error!("missing GENERATIVE_API_KEY / GOOGLE_API_KEY, cannot reach upstream");
        return Err(ProxyError::Misconfigured);
    };

    let payload = UpstreamPayload::new(&generation);
    let body = state.upstream.generate(api_key, &payload).await?;

    Ok(Json(body))
}
