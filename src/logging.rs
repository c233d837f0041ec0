//! Tracing subscriber setup for the binary and for tests.

use anyhow::Result;
use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `-v` raises the crate level to debug,
/// `-vv` to trace, and `--quiet` drops everything below errors. With `json`
/// set, log lines are emitted as JSON objects on stderr.
///
/// # Errors
///
/// Returns an error if a global subscriber was already installed.
pub fn init_logging(verbose: u8, quiet: bool, json: bool) -> Result<()> {
    let default_directive = if quiet {
        "error"
    } else {
        match verbose {
            0 => "workitems=warn,warn",
            1 => "workitems=debug,info",
            _ => "workitems=trace,debug",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}

static TEST_LOGGING: Once = Once::new();

/// Route logs through the test harness's captured writer. Safe to call from
/// every test.
pub fn init_test_logging() {
    TEST_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}
