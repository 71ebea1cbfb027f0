//! Chromium implementation of the browser seam, via the DevTools protocol.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures_util::StreamExt;
use lastseen_core::ProbeError;
use tokio::task::JoinHandle;

use crate::config::WhatsAppConfig;
use crate::session::{ChatDriver, ChatSession, LaunchMode, ListItem};

/// Upper bound for Chromium to come up and expose its DevTools endpoint.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Launches Chromium on a persistent profile directory.
#[derive(Debug, Clone)]
pub struct ChromeDriver {
    url: String,
    chrome_bin: Option<PathBuf>,
    profile_dir: PathBuf,
}

impl ChromeDriver {
    pub fn new(url: impl Into<String>, profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            chrome_bin: None,
            profile_dir: profile_dir.into(),
        }
    }

    #[must_use]
    pub fn with_chrome_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.chrome_bin = Some(bin.into());
        self
    }

    pub fn from_config(config: &WhatsAppConfig) -> Self {
        let driver = Self::new(config.url.clone(), config.profile_dir.clone());
        match &config.chrome_bin {
            Some(bin) => driver.with_chrome_bin(bin.clone()),
            None => driver,
        }
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }
}

/// Create the profile directory if needed. Existing contents (cookies, local
/// storage holding the authenticated session) are left untouched.
pub fn prepare_profile_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[async_trait]
impl ChatDriver for ChromeDriver {
    type Session = ChromeSession;

    async fn open(&self, mode: LaunchMode) -> Result<ChromeSession, ProbeError> {
        prepare_profile_dir(&self.profile_dir).map_err(|e| {
            ProbeError::session(format!(
                "cannot create profile dir {}: {e}",
                self.profile_dir.display()
            ))
        })?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&self.profile_dir)
            .launch_timeout(LAUNCH_TIMEOUT);
        if mode == LaunchMode::Interactive {
            builder = builder.with_head();
        }
        if let Some(ref bin) = self.chrome_bin {
            builder = builder.chrome_executable(bin);
        }
        let config = builder.build().map_err(ProbeError::SessionUnavailable)?;

        let (mut browser, mut events) = Browser::launch(config)
            .await
            .map_err(|e| ProbeError::session(format!("browser launch failed: {e}")))?;

        // The handler stream must be driven for any CDP call to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    tracing::debug!("cdp handler: {e}");
                }
            }
        });

        match browser.new_page(self.url.as_str()).await {
            Ok(page) => {
                tracing::debug!(url = %self.url, ?mode, "browser session opened");
                Ok(ChromeSession {
                    browser,
                    page,
                    handler,
                })
            }
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    tracing::warn!("failed to close browser after navigation error: {close_err}");
                }
                let _ = browser.wait().await;
                handler.abort();
                Err(ProbeError::session(format!("navigation to {} failed: {e}", self.url)))
            }
        }
    }
}

/// A live browser plus the page pointed at the chat client.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromeSession {
    async fn nth(&self, selector: &str, index: usize) -> Result<chromiumoxide::Element, ProbeError> {
        let mut elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| ProbeError::session(format!("query {selector:?} failed: {e}")))?;
        if index >= elements.len() {
            return Err(ProbeError::session(format!(
                "element {index} of {selector:?} disappeared"
            )));
        }
        Ok(elements.swap_remove(index))
    }
}

#[async_trait]
impl ChatSession for ChromeSession {
    async fn exists(&self, selector: &str) -> Result<bool, ProbeError> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), ProbeError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| ProbeError::session(format!("{selector:?} not found: {e}")))?;
        element
            .click()
            .await
            .map_err(|e| ProbeError::session(format!("focus {selector:?} failed: {e}")))?;
        element
            .type_str(text)
            .await
            .map_err(|e| ProbeError::session(format!("typing into {selector:?} failed: {e}")))?;
        Ok(())
    }

    async fn list_items(&self, selector: &str) -> Result<Vec<ListItem>, ProbeError> {
        let elements = match self.page.find_elements(selector).await {
            Ok(elements) => elements,
            Err(e) => {
                tracing::debug!("no rows for {selector:?}: {e}");
                return Ok(Vec::new());
            }
        };

        let mut items = Vec::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            let style = element
                .attribute("style")
                .await
                .map_err(|e| ProbeError::session(format!("reading row style failed: {e}")))?;
            items.push(ListItem { index, style });
        }
        Ok(items)
    }

    async fn click_item(&self, selector: &str, index: usize) -> Result<(), ProbeError> {
        let element = self.nth(selector, index).await?;
        element
            .click()
            .await
            .map_err(|e| ProbeError::session(format!("click on row {index} failed: {e}")))?;
        Ok(())
    }

    async fn read_property(
        &self,
        selector: &str,
        property: &str,
    ) -> Result<Option<String>, ProbeError> {
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(None);
        };
        let value = element
            .property(property)
            .await
            .map_err(|e| ProbeError::session(format!("reading {property:?} failed: {e}")))?;
        Ok(value.and_then(|v| v.as_str().map(str::to_string)))
    }

    async fn close(mut self) -> Result<(), ProbeError> {
        let closed = self
            .browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| ProbeError::session(format!("browser close failed: {e}")));
        if let Err(e) = self.browser.wait().await {
            tracing::debug!("waiting for browser exit: {e}");
        }
        self.handler.abort();
        closed
    }

    async fn hand_over(mut self) -> Result<(), ProbeError> {
        let exited = self
            .browser
            .wait()
            .await
            .map(|_| ())
            .map_err(|e| ProbeError::session(format!("browser wait failed: {e}")));
        self.handler.abort();
        exited
    }
}
