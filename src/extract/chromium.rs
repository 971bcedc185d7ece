//! Chromium-based renderer using chromiumoxide.
//!
//! Every context is its own headless browser process with a throwaway
//! profile directory, torn down in `close` (or on drop if the refresh is
//! cancelled mid-flight).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;

use super::{PageContext, PageRenderer};

pub const ENV_CHROME_PATH: &str = "SEATS_CHROME_PATH";

/// How long a closing page or browser gets before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Resolve the browser binary: explicit path, then `$SEATS_CHROME_PATH`.
/// `None` lets chromiumoxide probe its default install locations.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        if p.exists() {
            return Some(p.to_path_buf());
        }
        tracing::warn!(target: "extract", path = %p.display(), "configured chrome path does not exist");
    }
    if let Ok(p) = std::env::var(ENV_CHROME_PATH) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

pub struct ChromiumRenderer {
    chrome_path: Option<PathBuf>,
    active_count: Arc<AtomicUsize>,
    launches: AtomicU64,
}

impl ChromiumRenderer {
    /// No browser is started here; each context launches its own.
    pub fn new(chrome_path: Option<&Path>) -> Self {
        Self {
            chrome_path: find_chromium(chrome_path),
            active_count: Arc::new(AtomicUsize::new(0)),
            launches: AtomicU64::new(0),
        }
    }

    fn browser_config(&self, profile: &Path) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn PageContext>> {
        let n = self.launches.fetch_add(1, Ordering::Relaxed);
        let profile = std::env::temp_dir().join(format!("seat-tracker-{}-{n}", std::process::id()));
        let config = self.browser_config(&profile)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        self.active_count.fetch_add(1, Ordering::Relaxed);
        let mut ctx = ChromiumContext {
            browser: None,
            page: None,
            handler,
            profile,
            active_count: Arc::clone(&self.active_count),
        };

        let page = browser.new_page("about:blank").await;
        ctx.browser = Some(browser);
        match page {
            Ok(page) => {
                ctx.page = Some(page);
                Ok(Box::new(ctx))
            }
            Err(e) => {
                let _ = ctx.shutdown().await;
                Err(e).context("failed to create new page")
            }
        }
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single browser process with one page.
pub struct ChromiumContext {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: JoinHandle<()>,
    profile: PathBuf,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumContext {
    fn page(&self) -> Result<&Page> {
        self.page.as_ref().context("page already closed")
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(page) = self.page.take() {
            let _ = tokio::time::timeout(EXIT_GRACE, page.close()).await;
        }
        let mut result = Ok(());
        if let Some(mut browser) = self.browser.take() {
            match browser.close().await {
                Ok(_) => {
                    if tokio::time::timeout(EXIT_GRACE, browser.wait()).await.is_err() {
                        tracing::warn!(target: "extract", "browser did not exit after close; killing");
                        let _ = browser.kill().await;
                    }
                }
                Err(e) => {
                    result = Err(anyhow!("browser close failed: {e}"));
                    let _ = browser.kill().await;
                }
            }
        }
        self.handler.abort();
        if let Err(e) = tokio::fs::remove_dir_all(&self.profile).await {
            tracing::trace!(target: "extract", profile = %self.profile.display(), error = %e, "profile cleanup skipped");
        }
        result
    }
}

impl Drop for ChromiumContext {
    fn drop(&mut self) {
        self.handler.abort();
        // Browser's own Drop kills the process if `shutdown` never ran.
        drop(self.page.take());
        drop(self.browser.take());
        let _ = std::fs::remove_dir_all(&self.profile);
        self.active_count.fetch_sub(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl PageContext for ChromiumContext {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let page = self.page()?;
        page.goto(url).await.context("navigation failed")?;
        // Settle on the load event before probing for the marker.
        let _ = page.wait_for_navigation().await;
        Ok(())
    }

    async fn text_content(&self, selector: &str) -> Result<Option<String>> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el === null ? false : String(el.textContent ?? ''); }})()",
            serde_json::to_string(selector)?
        );
        let result = self
            .page()?
            .evaluate(script.as_str())
            .await
            .context("selector probe failed")?;

        let value: serde_json::Value = result
            .into_value()
            .map_err(|e| anyhow!("failed to convert JS result: {e:?}"))?;
        Ok(match value {
            serde_json::Value::String(s) => Some(s),
            _ => None,
        })
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.shutdown().await
    }
}
