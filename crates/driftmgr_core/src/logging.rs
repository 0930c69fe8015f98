//! Structured-logging bootstrap (spec §1.1), modeled on
//! `papyrus_node::main::configure_tracing`: a compact `fmt` layer driven by
//! an `EnvFilter`. Call this once, near process start, before constructing
//! a [`crate::DriftMgr`].

use tracing_subscriber::EnvFilter;

/// The filter directive used when neither `RUST_LOG` nor `DRIFTMGR_LOG` is
/// set: info-level everywhere, debug for this workspace's own crates.
const DEFAULT_FILTER: &str = "info,driftmgr=debug";

/// Installs a compact-formatted, `EnvFilter`-driven global subscriber.
/// `DRIFTMGR_LOG` takes precedence over `RUST_LOG`; if neither is set,
/// [`DEFAULT_FILTER`] applies. Safe to call more than once: subsequent
/// calls are no-ops, matching `tracing`'s own global-subscriber contract.
pub fn init_tracing() {
    let filter = std::env::var("DRIFTMGR_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_owned());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .compact()
        .try_init();
}
