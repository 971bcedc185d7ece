// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use seat_tracker::extract::fixture::FixtureRenderer;
use seat_tracker::extract::{Extractor, ExtractorConfig};
use seat_tracker::{Scheduler, Target, TargetId, TargetRegistry};

pub fn url(id: TargetId) -> String {
    format!("https://events.test/{id}")
}

/// Short timeouts so failure paths resolve in milliseconds.
pub fn fast_cfg() -> ExtractorConfig {
    ExtractorConfig {
        navigation_timeout: Duration::from_millis(2_000),
        selector_timeout: Duration::from_millis(80),
        poll_interval: Duration::from_millis(5),
        close_timeout: Duration::from_millis(100),
    }
}

/// Registry with one target per id (URL from [`url`]) and a scheduler over a fixture renderer.
pub fn setup(ids: &[TargetId]) -> (Arc<FixtureRenderer>, Scheduler) {
    setup_with(ids, fast_cfg())
}

pub fn setup_with(ids: &[TargetId], cfg: ExtractorConfig) -> (Arc<FixtureRenderer>, Scheduler) {
    let renderer = Arc::new(FixtureRenderer::new());
    let mut registry = TargetRegistry::new();
    for &id in ids {
        registry
            .register_target(Target::new(id, url(id), "p.text-xs"))
            .expect("register");
    }
    let extractor = Arc::new(Extractor::new(renderer.clone(), cfg));
    let scheduler = Scheduler::new(Arc::new(registry), extractor);
    (renderer, scheduler)
}
