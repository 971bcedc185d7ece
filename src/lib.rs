// src/lib.rs
// Public library surface for integration tests (and the binary).

pub mod api;
pub mod config;
pub mod extract;
pub mod metrics;
pub mod registry;
pub mod scheduler;
pub mod target;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::task::JoinHandle;

pub use crate::api::{router, AppState};
pub use crate::config::SeatsConfig;
pub use crate::extract::{ExtractionError, ExtractionErrorKind, Extractor, PageRenderer};
pub use crate::registry::{CacheEntry, CacheState, TargetRegistry};
pub use crate::scheduler::{RefreshOutcome, Scheduler};
pub use crate::target::{ExtractionRule, Target, TargetId};

/// Registry, scheduler and HTTP state wired from one config.
pub struct SeatTracker {
    pub registry: Arc<TargetRegistry>,
    pub scheduler: Scheduler,
    pub state: AppState,
}

impl SeatTracker {
    /// Register every configured target. Nothing runs until [`SeatTracker::start`].
    pub fn build(cfg: &SeatsConfig, renderer: Arc<dyn PageRenderer>) -> Result<Self> {
        let mut registry = TargetRegistry::new();
        for target in cfg.targets() {
            registry.register_target(target.clone())?;
        }
        let registry = Arc::new(registry);

        let extractor = Arc::new(Extractor::new(renderer, cfg.extractor_config()));
        let scheduler = Scheduler::new(Arc::clone(&registry), extractor);
        let state = AppState::new(Arc::clone(&registry), cfg.static_dir.clone());

        Ok(Self {
            registry,
            scheduler,
            state,
        })
    }

    pub fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    /// Initial refresh of every target plus one periodic cycle each.
    pub fn start(&self, cfg: &SeatsConfig) -> Vec<JoinHandle<()>> {
        self.scheduler.spawn_all(&cfg.schedule())
    }
}
