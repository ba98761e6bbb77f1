//! Tracing bootstrap for the smoke binary.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,channel_runtime=debug,channel_smoke=debug";

/// Install the global subscriber.
///
/// Filter precedence: `RUST_LOG`, then `CHANNEL_SMOKE_LOG`, then
/// `CHANNEL_LOG`, then the built-in default.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(filter_from_env())
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    ["CHANNEL_SMOKE_LOG", "CHANNEL_LOG"]
        .into_iter()
        .filter_map(|key| env::var(key).ok())
        .filter(|value| !value.trim().is_empty())
        .find_map(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
