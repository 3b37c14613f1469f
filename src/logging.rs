//! Tracing subscriber setup.
//!
//! Filter comes from `RUST_LOG`, falling back to [`DEFAULT_FILTER`]. Output
//! goes to stderr so CLI commands can print JSON on stdout.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "mail_insight=info,tower_http=info";

/// Installs the global subscriber. Later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
