//! Tracing subscriber setup for the `memflow` binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is
//! the binary's job. `RUST_LOG` overrides the default filter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "memflow=info,memflow_core=info";

/// Install a global fmt subscriber writing to stderr.
///
/// Stdout is left to command output. Calling this twice is harmless: the
/// second installation attempt is ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
