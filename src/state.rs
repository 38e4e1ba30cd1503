use std::sync::Arc;
use tokio::sync::watch;
use crate::gate::GateSnapshot;
use crate::rate_limit::RateLimiter;
use crate::upstream::UpstreamClient;
// app's shared state

pub struct AppState {
    pub upstream: UpstreamClient,
    pub api_key: Option<String>, // None -> every dream request is Misconfigured
    pub rate_limiter: Arc<RateLimiter>,
    pub gate: watch::Receiver<GateSnapshot>, // latest sample from the gate timer
}
