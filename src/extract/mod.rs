// src/extract/mod.rs
//! Page extraction: load a rendered page, wait for the marker element, parse its text.
//!
//! The browser engine sits behind [`PageRenderer`] / [`PageContext`] so the
//! scheduler can be driven by Chromium in production and by
//! [`fixture::FixtureRenderer`] in tests.

pub mod chromium;
pub mod fixture;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::target::Target;

/// A browser engine that hands out isolated rendering contexts.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Create a fresh, isolated context. Failing here means the engine itself is unavailable.
    async fn new_context(&self) -> Result<Box<dyn PageContext>>;
    /// Number of contexts currently open.
    fn active_contexts(&self) -> usize;
}

/// A single rendering context (one page).
#[async_trait]
pub trait PageContext: Send + Sync {
    /// Navigate and wait for the load to settle.
    async fn navigate(&mut self, url: &str) -> Result<()>;
    /// `textContent` of the first element matching `selector`, `None` if absent.
    async fn text_content(&self, selector: &str) -> Result<Option<String>>;
    /// Release the context and everything it owns.
    async fn close(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    Navigation,
    Timeout,
    Parse,
    Renderer,
}

impl ExtractionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionErrorKind::Navigation => "navigation",
            ExtractionErrorKind::Timeout => "timeout",
            ExtractionErrorKind::Parse => "parse",
            ExtractionErrorKind::Renderer => "renderer",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("selector {selector:?} did not appear within {waited_ms}ms")]
    Timeout { selector: String, waited_ms: u64 },
    #[error("could not parse {text:?}: {reason}")]
    Parse { text: String, reason: String },
    #[error("page renderer unavailable: {0}")]
    Renderer(String),
}

impl ExtractionError {
    pub(crate) fn parse(text: &str, reason: impl Into<String>) -> Self {
        ExtractionError::Parse {
            text: text.trim().to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ExtractionErrorKind {
        match self {
            ExtractionError::Navigation { .. } => ExtractionErrorKind::Navigation,
            ExtractionError::Timeout { .. } => ExtractionErrorKind::Timeout,
            ExtractionError::Parse { .. } => ExtractionErrorKind::Parse,
            ExtractionError::Renderer(_) => ExtractionErrorKind::Renderer,
        }
    }
}

/// Timing knobs for one extraction.
#[derive(Clone, Copy, Debug)]
pub struct ExtractorConfig {
    pub navigation_timeout: Duration,
    pub selector_timeout: Duration,
    pub poll_interval: Duration,
    /// Upper bound on context teardown; past it the context is dropped.
    pub close_timeout: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_millis(30_000),
            selector_timeout: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(250),
            close_timeout: Duration::from_millis(5_000),
        }
    }
}

pub struct Extractor {
    renderer: Arc<dyn PageRenderer>,
    cfg: ExtractorConfig,
}

impl Extractor {
    pub fn new(renderer: Arc<dyn PageRenderer>, cfg: ExtractorConfig) -> Self {
        Self { renderer, cfg }
    }

    pub fn renderer(&self) -> &Arc<dyn PageRenderer> {
        &self.renderer
    }

    /// Load `target` in a fresh context and parse its seat count.
    ///
    /// The context is closed (or dropped once `close_timeout` passes) before
    /// returning on every path. No retries here; the next scheduled tick is the retry.
    pub async fn extract(&self, target: &Target) -> Result<i64, ExtractionError> {
        let mut ctx = self
            .renderer
            .new_context()
            .await
            .map_err(|e| ExtractionError::Renderer(format!("{e:#}")))?;

        let outcome = self.extract_in(ctx.as_mut(), target).await;

        match tokio::time::timeout(self.cfg.close_timeout, ctx.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(target: "extract", id = target.id, error = ?e, "context close failed");
            }
            Err(_) => {
                tracing::warn!(
                    target: "extract",
                    id = target.id,
                    waited_ms = self.cfg.close_timeout.as_millis() as u64,
                    "context close timed out; dropping it"
                );
            }
        }
        outcome
    }

    async fn extract_in(&self, ctx: &mut dyn PageContext, target: &Target) -> Result<i64, ExtractionError> {
        let url = target.source_url.as_str();
        tracing::debug!(target: "extract", id = target.id, url, "navigating");

        match tokio::time::timeout(self.cfg.navigation_timeout, ctx.navigate(url)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ExtractionError::Navigation {
                    url: url.to_string(),
                    reason: format!("{e:#}"),
                })
            }
            Err(_) => {
                return Err(ExtractionError::Navigation {
                    url: url.to_string(),
                    reason: format!("timed out after {}ms", self.cfg.navigation_timeout.as_millis()),
                })
            }
        }

        let text = self.wait_for_text(ctx, &target.content_selector).await?;
        tracing::debug!(target: "extract", id = target.id, text = %text.trim(), "marker found");
        target.extraction_rule.apply(&text)
    }

    /// Poll until the selector resolves or the selector timeout elapses.
    async fn wait_for_text(&self, ctx: &dyn PageContext, selector: &str) -> Result<String, ExtractionError> {
        let started = Instant::now();
        let poll = async {
            loop {
                match ctx.text_content(selector).await {
                    Ok(Some(text)) => return text,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::trace!(target: "extract", selector, error = ?e, "selector probe failed");
                    }
                }
                tokio::time::sleep(self.cfg.poll_interval).await;
            }
        };

        tokio::time::timeout(self.cfg.selector_timeout, poll)
            .await
            .map_err(|_| ExtractionError::Timeout {
                selector: selector.to_string(),
                waited_ms: started.elapsed().as_millis() as u64,
            })
    }
}
