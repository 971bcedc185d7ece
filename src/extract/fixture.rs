// src/extract/fixture.rs
//! In-process renderer that serves scripted pages instead of launching a browser.
//! Used by tests; each URL maps to a queue of page behaviours, one per context.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{PageContext, PageRenderer};

/// What a scripted page does when loaded.
#[derive(Debug, Clone)]
pub enum FixturePage {
    /// Marker present immediately with this text.
    Text(String),
    /// Marker shows up after `polls` unsuccessful probes.
    TextAfterPolls { text: String, polls: usize },
    /// Page loads but the marker never appears.
    NoMarker,
    /// Navigation fails with this reason.
    NavigationError(String),
    /// Navigation never completes.
    HangNavigation,
    /// Navigation takes `delay`, then behaves like `page`.
    Slow { delay: Duration, page: Box<FixturePage> },
}

impl FixturePage {
    pub fn text(s: impl Into<String>) -> Self {
        FixturePage::Text(s.into())
    }

    pub fn slow(delay: Duration, page: FixturePage) -> Self {
        FixturePage::Slow {
            delay,
            page: Box::new(page),
        }
    }
}

type Pages = Arc<Mutex<HashMap<String, VecDeque<FixturePage>>>>;

fn lock(pages: &Pages) -> MutexGuard<'_, HashMap<String, VecDeque<FixturePage>>> {
    match pages.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

#[derive(Default)]
pub struct FixtureRenderer {
    pages: Pages,
    active: Arc<AtomicUsize>,
    opened: AtomicUsize,
    unavailable: AtomicBool,
    close_hangs: AtomicBool,
}

impl FixtureRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `page` for `url` on every load.
    pub fn set(&self, url: &str, page: FixturePage) {
        lock(&self.pages).insert(url.to_string(), VecDeque::from([page]));
    }

    /// Serve `pages` in order for successive loads of `url`; the last one repeats.
    pub fn script(&self, url: &str, pages: impl IntoIterator<Item = FixturePage>) {
        lock(&self.pages).insert(url.to_string(), pages.into_iter().collect());
    }

    /// Make `new_context` fail, as if the browser could not start.
    pub fn set_unavailable(&self, on: bool) {
        self.unavailable.store(on, Ordering::SeqCst);
    }

    /// Make `close` never complete, like a wedged browser that ignores shutdown.
    pub fn set_close_hangs(&self, on: bool) {
        self.close_hangs.store(on, Ordering::SeqCst);
    }

    /// Total contexts handed out so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn next_page(pages: &Pages, url: &str) -> Option<FixturePage> {
        let mut map = lock(pages);
        let queue = map.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl PageRenderer for FixtureRenderer {
    async fn new_context(&self) -> Result<Box<dyn PageContext>> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("fixture renderer marked unavailable");
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FixtureContext {
            pages: Arc::clone(&self.pages),
            active: Arc::clone(&self.active),
            loaded: None,
            probes: AtomicUsize::new(0),
            close_hangs: self.close_hangs.load(Ordering::SeqCst),
        }))
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct FixtureContext {
    pages: Pages,
    active: Arc<AtomicUsize>,
    loaded: Option<FixturePage>,
    probes: AtomicUsize,
    close_hangs: bool,
}

impl Drop for FixtureContext {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PageContext for FixtureContext {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let mut page = FixtureRenderer::next_page(&self.pages, url)
            .ok_or_else(|| anyhow!("no fixture for {url}"))?;

        while let FixturePage::Slow { delay, page: inner } = page {
            tokio::time::sleep(delay).await;
            page = *inner;
        }

        match page {
            FixturePage::NavigationError(reason) => bail!("{reason}"),
            FixturePage::HangNavigation => std::future::pending().await,
            other => {
                self.loaded = Some(other);
                Ok(())
            }
        }
    }

    async fn text_content(&self, _selector: &str) -> Result<Option<String>> {
        let probe = self.probes.fetch_add(1, Ordering::SeqCst);
        match &self.loaded {
            Some(FixturePage::Text(t)) => Ok(Some(t.clone())),
            Some(FixturePage::TextAfterPolls { text, polls }) if probe >= *polls => Ok(Some(text.clone())),
            Some(_) => Ok(None),
            None => bail!("no page loaded"),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if self.close_hangs {
            std::future::pending::<()>().await;
        }
        drop(self);
        Ok(())
    }
}
