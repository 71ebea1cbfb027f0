//! WhatsApp presence probe: per-call session state machine.
//!
//! OpenSession → Search → SelectMatch → ReadStatus → Classify, releasing the
//! browser on every exit path.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use lastseen_core::{Probe, ProbeError, Vocabulary, resolve_status};

use crate::chrome::ChromeDriver;
use crate::config::{Delays, Selectors, UnknownLocale, WhatsAppConfig};
use crate::session::{ChatDriver, ChatSession, LaunchMode, ListItem};
use crate::settle::Settle;

pub const PROBE_NAME: &str = "whatsapp";

/// Source of the "now" anchor for relative phrases. The web client renders
/// times in the browser's zone, which is the host's. The anchor keeps its
/// zone, not just the current offset, so a day on the far side of a
/// daylight-saving switch resolves with that day's offset.
pub type Clock<Tz> = fn() -> DateTime<Tz>;

pub struct WhatsAppProbe<D: ChatDriver, Tz: TimeZone = Local> {
    driver: D,
    selectors: Selectors,
    delays: Delays,
    vocabularies: Vec<&'static Vocabulary>,
    clock: Clock<Tz>,
}

impl WhatsAppProbe<ChromeDriver> {
    pub fn from_config(config: &WhatsAppConfig) -> Result<Self, UnknownLocale> {
        Ok(Self::new(
            ChromeDriver::from_config(config),
            config.selectors.clone(),
            config.delays.clone(),
            config.vocabularies()?,
        ))
    }
}

impl<D: ChatDriver> WhatsAppProbe<D> {
    pub fn new(
        driver: D,
        selectors: Selectors,
        delays: Delays,
        vocabularies: Vec<&'static Vocabulary>,
    ) -> Self {
        Self {
            driver,
            selectors,
            delays,
            vocabularies,
            clock: Local::now,
        }
    }

    #[must_use]
    pub fn with_clock<Z: TimeZone>(self, clock: Clock<Z>) -> WhatsAppProbe<D, Z> {
        WhatsAppProbe {
            driver: self.driver,
            selectors: self.selectors,
            delays: self.delays,
            vocabularies: self.vocabularies,
            clock,
        }
    }
}

impl<D: ChatDriver, Tz: TimeZone> WhatsAppProbe<D, Tz> {

    async fn wait_for(
        &self,
        session: &D::Session,
        selector: &str,
        settle: Settle,
    ) -> bool {
        settle
            .until(move || async move { session.exists(selector).await.unwrap_or(false) })
            .await
    }

    /// Search → SelectMatch → ReadStatus. Returns the raw header text.
    async fn read_status(&self, session: &D::Session, user: &str) -> Result<String, ProbeError> {
        let sel = &self.selectors;

        if !self
            .wait_for(session, &sel.search_box, self.delays.page_load())
            .await
        {
            return Err(ProbeError::session("search control did not render"));
        }
        tokio::time::sleep(self.delays.pre_input()).await;
        session.type_text(&sel.search_box, user).await?;

        // The list always holds a placeholder row; real results make it longer.
        let list = sel.list_item.as_str();
        self.delays
            .search()
            .until(move || async move {
                session
                    .list_items(list)
                    .await
                    .map(|items| items.len() > 1)
                    .unwrap_or(false)
            })
            .await;

        let items = session.list_items(list).await?;
        let target = select_match(&items, &sel.first_slot_marker, user)?;
        tracing::debug!(user, row = target.index, rows = items.len(), "selected chat row");
        session.click_item(list, target.index).await?;

        let (header, property) = (sel.status_header.as_str(), sel.status_property.as_str());
        self.delays
            .header()
            .until(move || async move {
                matches!(
                    session.read_property(header, property).await,
                    Ok(Some(ref text)) if !text.trim().is_empty()
                )
            })
            .await;

        Ok(session
            .read_property(header, property)
            .await?
            .unwrap_or_default())
    }
}

/// Pick the chat row to open from the rendered result list.
///
/// Rows are virtualized with absolute positioning, so DOM order says nothing
/// about visual order. The row whose style carries the first-slot offset wins;
/// otherwise the first enumerated row. A list holding only the placeholder
/// row means no match.
pub fn select_match<'a>(
    items: &'a [ListItem],
    first_slot_marker: &str,
    user: &str,
) -> Result<&'a ListItem, ProbeError> {
    if items.len() <= 1 {
        return Err(ProbeError::SubjectNotFound {
            user: user.to_string(),
        });
    }

    Ok(items
        .iter()
        .find(|item| {
            item.style
                .as_deref()
                .is_some_and(|style| style.contains(first_slot_marker))
        })
        .unwrap_or(&items[0]))
}

#[async_trait]
impl<D, Tz> Probe for WhatsAppProbe<D, Tz>
where
    D: ChatDriver,
    Tz: TimeZone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        PROBE_NAME
    }

    /// Opens a visible window on the persistent profile and waits for the
    /// operator to finish logging in. The window is handed over, not closed;
    /// the authenticated profile stays on disk for later status queries.
    async fn initialize(&self) -> Result<(), ProbeError> {
        let session = self.driver.open(LaunchMode::Interactive).await?;

        tracing::info!("waiting for WhatsApp Web login (scan the QR code if prompted)");
        if !self
            .wait_for(&session, &self.selectors.logged_in_marker, self.delays.login())
            .await
        {
            if let Err(e) = session.close().await {
                tracing::warn!(source = PROBE_NAME, "failed to release browser session: {e}");
            }
            return Err(ProbeError::session("login marker did not appear before timeout"));
        }

        tracing::info!("logged in; close the browser window to finish setup");
        session.hand_over().await
    }

    async fn get_status(&self, user: &str) -> Result<DateTime<Utc>, ProbeError> {
        let session = self.driver.open(LaunchMode::Headless).await?;
        let outcome = self.read_status(&session, user).await;

        if let Err(e) = session.close().await {
            tracing::warn!(source = PROBE_NAME, "failed to release browser session: {e}");
        }

        let status = outcome?;
        tracing::debug!(user, status = %status, "read status text");
        resolve_status(&status, &self.vocabularies, &(self.clock)())
    }
}
