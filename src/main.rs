//! Seat tracker — Binary Entrypoint
//! Loads the target config, starts the refresh scheduler and serves the cache over Axum.

use std::sync::Arc;

use seat_tracker::extract::chromium::ChromiumRenderer;
use seat_tracker::metrics::Metrics;
use seat_tracker::{telemetry, SeatTracker, SeatsConfig};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    telemetry::init_tracing();

    let cfg = SeatsConfig::load_default()?;
    let metrics = Metrics::init(cfg.refresh_interval_ms)?;

    let renderer = Arc::new(ChromiumRenderer::new(cfg.chrome_path.as_deref()));
    let tracker = SeatTracker::build(&cfg, renderer)?;

    // Register → prime → periodic; handles detach and run for the life of the process.
    let _jobs = tracker.start(&cfg);
    tracing::info!(
        targets = tracker.registry.len(),
        interval_ms = cfg.refresh_interval_ms,
        static_dir = %cfg.static_dir.display(),
        "seat tracker started"
    );

    let router = tracker.router().merge(metrics.router());
    Ok(router.into())
}
