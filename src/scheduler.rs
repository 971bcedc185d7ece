// src/scheduler.rs
//! Periodic refresh of every registered target.
//!
//! Startup is two explicit steps: `prime` runs one refresh per target, then
//! `start_periodic` begins each target's own ticker. Ticks go through the
//! per-target single-flight flag, so a slow page skips ticks instead of
//! stacking up overlapping browser sessions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::extract::{ExtractionErrorKind, Extractor};
use crate::registry::{Publish, TargetRegistry};
use crate::target::TargetId;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("seats_refresh_total", "Refresh runs by target and outcome.");
        describe_counter!(
            "seats_refresh_errors_total",
            "Failed refreshes by target and error kind."
        );
        describe_counter!(
            "seats_refresh_skipped_total",
            "Ticks skipped because the previous run was still in flight."
        );
        describe_histogram!("seats_refresh_ms", "Extraction time in milliseconds.");
        describe_gauge!("seats_last_value", "Last successfully extracted seat count.");
        describe_gauge!(
            "seats_last_success_ts",
            "Unix ts of the last successful refresh."
        );
    });
}

/// Result of one refresh attempt, for logs and tests. Callers never see an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated(i64),
    Failed(ExtractionErrorKind),
    /// Finished after a later-started run had already published a value.
    Superseded,
    /// Previous run for the same target still in flight.
    Skipped,
    UnknownTarget,
}

impl RefreshOutcome {
    fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Updated(_) => "updated",
            RefreshOutcome::Failed(_) => "failed",
            RefreshOutcome::Superseded => "superseded",
            RefreshOutcome::Skipped => "skipped",
            RefreshOutcome::UnknownTarget => "unknown",
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<TargetRegistry>,
    extractor: Arc<Extractor>,
}

impl Scheduler {
    pub fn new(registry: Arc<TargetRegistry>, extractor: Arc<Extractor>) -> Self {
        Self { registry, extractor }
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Refresh `id` now. Success replaces the cached value in one publication;
    /// failure is logged and recorded as `last_error`, keeping the value.
    pub async fn run_once(&self, id: TargetId) -> RefreshOutcome {
        ensure_metrics_described();

        let (Some(target), Some(seq)) = (self.registry.target(id), self.registry.begin_run(id)) else {
            tracing::warn!(target: "scheduler", id, "refresh requested for unknown target");
            return RefreshOutcome::UnknownTarget;
        };

        let t0 = Instant::now();
        let result = self.extractor.extract(&target).await;
        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("seats_refresh_ms", "target" => id.to_string()).record(ms);

        let now = Utc::now();
        let outcome = match result {
            Ok(value) => match self.registry.publish_success(id, seq, value, now) {
                Publish::Applied => {
                    gauge!("seats_last_value", "target" => id.to_string()).set(value as f64);
                    gauge!("seats_last_success_ts", "target" => id.to_string())
                        .set(now.timestamp().max(0) as f64);
                    tracing::info!(target: "scheduler", id, seats = value, ms, "seat count updated");
                    RefreshOutcome::Updated(value)
                }
                Publish::Superseded => {
                    tracing::debug!(target: "scheduler", id, seq, seats = value, "dropping result of older run");
                    RefreshOutcome::Superseded
                }
                Publish::UnknownTarget => RefreshOutcome::UnknownTarget,
            },
            Err(e) => {
                let kind = e.kind();
                counter!(
                    "seats_refresh_errors_total",
                    "target" => id.to_string(),
                    "kind" => kind.as_str()
                )
                .increment(1);
                if kind == ExtractionErrorKind::Renderer {
                    tracing::error!(target: "scheduler", id, error = %e, "page renderer unavailable; tick skipped");
                } else {
                    tracing::warn!(target: "scheduler", id, kind = kind.as_str(), error = %e, ms, "refresh failed; keeping cached value");
                }
                match self.registry.publish_failure(id, seq, e.to_string(), now) {
                    Publish::Applied => RefreshOutcome::Failed(kind),
                    Publish::Superseded => RefreshOutcome::Superseded,
                    Publish::UnknownTarget => RefreshOutcome::UnknownTarget,
                }
            }
        };

        counter!(
            "seats_refresh_total",
            "target" => id.to_string(),
            "outcome" => outcome.label()
        )
        .increment(1);
        outcome
    }

    /// `run_once` behind the single-flight flag: skipped if a run for `id` is in flight.
    pub async fn try_run_once(&self, id: TargetId) -> RefreshOutcome {
        let Some(_guard) = self.registry.try_claim(id) else {
            if self.registry.target(id).is_none() {
                return RefreshOutcome::UnknownTarget;
            }
            ensure_metrics_described();
            counter!("seats_refresh_skipped_total", "target" => id.to_string()).increment(1);
            tracing::debug!(target: "scheduler", id, "previous refresh still running; tick skipped");
            return RefreshOutcome::Skipped;
        };
        self.run_once(id).await
    }

    /// Initial refresh of every target, concurrently.
    pub async fn prime(&self) -> Vec<(TargetId, RefreshOutcome)> {
        let ids = self.registry.ids();
        let runs = ids.iter().map(|&id| async move { (id, self.try_run_once(id).await) });
        futures::future::join_all(runs).await
    }

    /// Tick every `interval`, first tick one interval from now.
    /// Each tick runs on its own task so a hung page never stalls the ticker.
    pub fn start_periodic(&self, id: TargetId, interval: Duration) -> JoinHandle<()> {
        let this = self.clone();
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            if this.registry.target(id).is_none() {
                tracing::warn!(target: "scheduler", id, "not scheduling unknown target");
                return;
            }
            tracing::info!(
                target: "scheduler",
                id,
                interval_ms = interval.as_millis() as u64,
                "periodic refresh started"
            );

            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let runner = this.clone();
                tokio::spawn(async move {
                    runner.try_run_once(id).await;
                });
            }
        })
    }

    /// Prime every target in the background, then start each periodic cycle.
    pub fn spawn_all(&self, schedule: &[(TargetId, Duration)]) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(schedule.len() + 1);

        let primer = self.clone();
        handles.push(tokio::spawn(async move {
            for (id, outcome) in primer.prime().await {
                tracing::debug!(target: "scheduler", id, outcome = ?outcome, "initial refresh done");
            }
        }));

        for &(id, interval) in schedule {
            handles.push(self.start_periodic(id, interval));
        }
        handles
    }
}
