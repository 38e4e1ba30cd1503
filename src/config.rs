use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_UNLOCK_AT: &str = "2025-12-05T00:00:00";
pub const DEFAULT_UPSTREAM_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-09-2025";

// Either variable carries the upstream key; the first one set wins.
pub const API_KEY_VARS: [&str; 2] = ["GENERATIVE_API_KEY", "GOOGLE_API_KEY"];

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "dream-gateway")]
#[command(about = "Countdown gate and rate-limited story proxy for the gift page")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP proxy and gate status endpoint
    Serve(ServeArgs),
    /// Show the unlock countdown in the terminal
    Countdown(CountdownArgs),
    /// Ask a running proxy for a future memory
    Dream(DreamArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GateArgs {
    // Local time the gift unlocks at
    #[arg(long, default_value = DEFAULT_UNLOCK_AT, value_parser = parse_unlock_at)]
    pub unlock_at: DateTime<Local>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    // Port to run the server on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    // Base of the generateContent endpoint, the model name is appended
    #[arg(long, default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream_url: String,

    // Model used for generation
    #[arg(long, env = "MODEL_NAME", default_value = DEFAULT_MODEL)]
    pub model: String,

    // Upstream request timeout in seconds
    #[arg(long, default_value_t = 15)]
    pub upstream_timeout: u64,

    // Rate limit max requests per window
    #[arg(long, default_value_t = 6)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, default_value_t = 30)]
    pub rate_window: u64,

    // How often expired rate limit windows are swept, in seconds
    #[arg(long, default_value_t = 300)]
    pub sweep_interval: u64,

    #[command(flatten)]
    pub gate: GateArgs,
}

impl ServeArgs {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval.max(1))
    }
}

#[derive(Args, Debug, Clone)]
pub struct CountdownArgs {
    // Show the content even while locked
    #[arg(long)]
    pub preview: bool,

    #[command(flatten)]
    pub gate: GateArgs,
}

#[derive(Args, Debug, Clone)]
pub struct DreamArgs {
    // Concept for the shared future, e.g. "Our 50th anniversary"
    pub concept: String,

    // Base URL of a running `serve`
    #[arg(long, default_value = "http://localhost:8080")]
    pub proxy_url: String,

    // Attempts before giving up
    #[arg(long, default_value_t = 5)]
    pub max_attempts: u32,

    // First backoff delay in milliseconds, doubled after every failure
    #[arg(long, default_value_t = 1000)]
    pub base_delay_ms: u64,

    // Per-attempt timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

impl DreamArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

// no offset means local time
pub fn parse_unlock_at(value: &str) -> Result<DateTime<Local>, String> {
    if let Ok(fixed) = DateTime::parse_from_rfc3339(value) {
        return Ok(fixed.with_timezone(&Local));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| format!("invalid unlock time {:?}: {}", value, e))?;

    // DST overlap picks the earlier instant; a gap has no such local time
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| format!("{:?} does not exist in the local time zone", value))
}

pub fn resolve_api_key<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    API_KEY_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .find(|key| !key.is_empty())
}
