//! `tracing` subscriber setup for hosts and the demo binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a formatting subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Returns false if a global subscriber was already set.
pub fn init_logging(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .try_init()
        .is_ok()
}
