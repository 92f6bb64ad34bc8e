//! Diagnostic logging setup for the binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! binary's job. Filters come from `INFERX_LOG` (e.g. `inferx=debug`) and
//! default to `warn`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "INFERX_LOG";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber, writing to `log_file` when given and to
/// stderr otherwise.
pub fn init_tracing(log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|err| -> Box<dyn std::error::Error> { err })?;
        }
        None => {
            builder
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|err| -> Box<dyn std::error::Error> { err })?;
        }
    }

    Ok(())
}
