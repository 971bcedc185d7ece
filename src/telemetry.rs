// src/telemetry.rs
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_FORMAT: &str = "SEATS_LOG_FORMAT";

const DEFAULT_FILTER: &str = "seat_tracker=info,scheduler=info,extract=info,api=info,warn";

/// Install the global subscriber: `RUST_LOG` filter (or the default above),
/// compact lines, or JSON when `SEATS_LOG_FORMAT=json`.
///
/// The hosting runtime may already have installed one; that is not an error.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var(ENV_LOG_FORMAT)
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed; keeping it");
    }
}
