//! Diagnostics for operators.
//!
//! Reads `RUST_LOG`. Defaults to `info` for this crate and `warn` for
//! everything else. Output goes to stderr in compact format so stdout stays
//! free for command results.
//!
//! ```bash
//! RUST_LOG=forge=debug forge run srs.md
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "warn,forge=info";

pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
