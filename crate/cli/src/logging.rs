use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_INIT: Once = Once::new();

/// Default filter when neither `--rust-log` nor `RUST_LOG` is given
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Install the global subscriber, once.
///
/// Logs go to stderr: stdout carries the cryptogram or the plaintext, and may be read by a
/// parent process. An explicit `filter` wins over `RUST_LOG`.
pub fn log_init(filter: Option<&str>) {
    LOG_INIT.call_once(|| {
        let filter = filter.map_or_else(
            || {
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
            },
            EnvFilter::new,
        );
        let format = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_level(true)
            .with_target(true)
            .with_ansi(false)
            .compact();
        // another subscriber may already be installed by an embedding program
        _ = tracing_subscriber::registry()
            .with(filter)
            .with(format)
            .try_init();
    });
}
