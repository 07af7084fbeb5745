//! Logging and tracing configuration
//!
//! Log lines go to stderr so they never interleave with the PASS/FAIL
//! table on stdout.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the CLI
///
/// Logs are controlled by the `RUST_LOG` environment variable. Without it the
/// default is INFO for this crate and WARN for dependencies; `debug` raises
/// this crate to DEBUG, which echoes captured program output and every
/// directive search.
pub fn init_cli(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("functest=debug,warn")
        } else {
            EnvFilter::new("functest=info,warn")
        }
    });

    // Ignore the error so repeated initialization (tests) is harmless
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();
}
