use anyhow::Context;
use axum::{
    Router,
    routing::{any, get},
};
use clap::Parser; // for cli
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod client;
mod config;
mod error;
mod gate;
mod handlers;
mod metrics;
mod models;
mod rate_limit;
mod retry;
mod state;
mod upstream;
#[cfg(test)]
mod test_utils;

use client::DreamClient;
use config::{Cli, Command, CountdownArgs, DreamArgs, ServeArgs, resolve_api_key};
use gate::{GateSnapshot, GateTimer, UnlockGate, system_clock};
use handlers::{dream_handler, health_handler, metrics_handler, unlock_handler};
use rate_limit::{RateLimiter, sweeper};
use state::AppState;
use upstream::UpstreamClient;

// this is main async function with tokio
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // parse cli arguments
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Countdown(args) => countdown(args).await,
        Command::Dream(args) => dream(args).await,
    }
}

// creating the router with routes
fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/dream", any(dream_handler)) // 405 for everything but POST
        .route("/api/unlock", get(unlock_handler))
        .route("/metrics", get(metrics_handler)) // metrics endpoint
        .with_state(state)
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let api_key = resolve_api_key(|name| std::env::var(name).ok());
    if api_key.is_none() {
        warn!("neither GENERATIVE_API_KEY nor GOOGLE_API_KEY is set, /api/dream will answer 500");
    }

    let upstream = UpstreamClient::new(&args.upstream_url, &args.model, args.upstream_timeout())
        .context("failed to build upstream client")?;

    let rate_limiter = Arc::new(RateLimiter::new(args.rate_limit, args.rate_window()));
    let sweeper_handle = tokio::spawn(sweeper(Arc::clone(&rate_limiter), args.sweep_interval()));

    let clock = system_clock();
    let gate = UnlockGate::new(args.gate.unlock_at, clock());
    let (gate_timer, gate_rx) = GateTimer::spawn(gate, clock);

    // creating shared state
    let state = Arc::new(AppState {
        upstream,
        api_key,
        rate_limiter: Arc::clone(&rate_limiter),
        gate: gate_rx,
    });

    let app = router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("Gateway running on http://localhost:{}", args.port);
    info!("Forwarding to {} (model {})", args.upstream_url, args.model);
    info!(
        "Rate limit: {} requests per {} seconds",
        rate_limiter.limit(),
        rate_limiter.window().as_secs()
    );
    info!("Gift unlocks at {}", args.gate.unlock_at.to_rfc3339());

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    gate_timer.cancel();
    sweeper_handle.abort();

    result.context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn print_snapshot(snapshot: &GateSnapshot, preview: bool) {
    match snapshot.remaining {
        Some(left) if !snapshot.is_visible(preview) => println!(
            "\u{1F512} {:02} days {:02} hours {:02} minutes {:02} seconds",
            left.days, left.hours, left.minutes, left.seconds
        ),
        Some(left) => println!(
            "\u{2764} content visible (preview), still {} days {:02}:{:02}:{:02} to go",
            left.days, left.hours, left.minutes, left.seconds
        ),
        None => println!("\u{2764} The treasure chest is open!"),
    }
}

// Terminal countdown, ends at unlock or ctrl-c
async fn countdown(args: CountdownArgs) -> anyhow::Result<()> {
    let clock = system_clock();
    let gate = UnlockGate::new(args.gate.unlock_at, clock());
    let (timer, mut rx) = GateTimer::spawn(gate, clock);

    print_snapshot(&rx.borrow_and_update(), args.preview);
    if !timer.is_running() {
        return Ok(());
    }

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                print_snapshot(&snapshot, args.preview);
                if snapshot.is_unlocked() {
                    break;
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    timer.cancel();
    Ok(())
}

async fn dream(args: DreamArgs) -> anyhow::Result<()> {
    let client = DreamClient::new(
        &args.proxy_url,
        Duration::from_secs(args.timeout),
        args.retry_policy(),
    )
    .context("failed to build http client")?;

    match client.dream(&args.concept).await {
        Ok(story) => {
            println!("{}", story);
            Ok(())
        }
        Err(e) => {
            anyhow::bail!("Failed to connect to the romantic well of inspiration. Error: {}", e)
        }
    }
}
