//! `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::DEFAULT_LOG_FILTER;

/// Installs a stderr fmt subscriber filtered by `filter` (EnvFilter syntax).
///
/// An unparsable filter falls back to [`DEFAULT_LOG_FILTER`]. Returns false
/// when a global subscriber was already installed; calling twice is harmless.
pub fn init(filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(parse_filter(filter))
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}

fn parse_filter(filter: &str) -> EnvFilter {
    EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}
