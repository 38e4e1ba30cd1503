mod health;
mod metrics;
mod dream;
mod unlock;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use dream::dream_handler;
pub use unlock::unlock_handler;
