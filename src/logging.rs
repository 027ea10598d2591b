//! Tracing setup for the minbuild binary.
//!
//! Diagnostics go to stderr so that stdout carries only results.

use std::sync::Once;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Default filter directive for the given verbosity.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "minbuild=debug"
    } else {
        "warn"
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the default level. Subsequent calls are ignored.
pub fn init_tracing(verbose: bool) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbose)
            .with_ansi(false);

        // Another subscriber may already be installed (e.g. by an embedding test)
        if tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
        {
            debug!("minbuild tracing initialized");
        }
    });
}
