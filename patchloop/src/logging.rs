//! Diagnostic tracing for patchloop.
//!
//! A run writes to three places:
//!
//! - stdout: one progress line per iteration, then the branch, commit and
//!   pull request URL (printed by `main`).
//! - stderr: `tracing` events filtered by `RUST_LOG`. Rejected commands,
//!   rejected patches and fallback branch or commit messages show up at `warn`,
//!   which is the default level.
//! - `.patchloop/runs/<branch-dir>/`: the audit trail written by
//!   [`crate::io::iteration_log`] and the finalizer. `RUST_LOG` never affects
//!   it.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "warn";

/// Install the stderr subscriber. Call once, before any work.
///
/// ```bash
/// RUST_LOG=patchloop::iterate=debug,patchloop::io::shell=debug patchloop run "add a /health endpoint"
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
