//! Probe configuration: endpoint, browser profile, DOM selectors, delays.

use std::path::PathBuf;
use std::time::Duration;

use lastseen_core::Vocabulary;
use lastseen_core::vocabulary::by_locale;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settle::Settle;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status locale: {0:?}")]
pub struct UnknownLocale(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub url: String,
    /// Chromium binary; autodetected when unset.
    pub chrome_bin: Option<PathBuf>,
    /// Persistent browser profile holding the authenticated session.
    pub profile_dir: PathBuf,
    /// Status vocabularies to try, in order.
    pub locales: Vec<String>,
    pub selectors: Selectors,
    pub delays: Delays,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            url: "https://web.whatsapp.com/".to_string(),
            chrome_bin: None,
            profile_dir: std::env::temp_dir().join("lastseen").join("chrome"),
            locales: vec!["ro".to_string(), "en".to_string()],
            selectors: Selectors::default(),
            delays: Delays::default(),
        }
    }
}

impl WhatsAppConfig {
    pub fn vocabularies(&self) -> Result<Vec<&'static Vocabulary>, UnknownLocale> {
        self.locales
            .iter()
            .map(|code| by_locale(code).ok_or_else(|| UnknownLocale(code.clone())))
            .collect()
    }
}

/// CSS selectors for the web client. Class names are minified and change
/// between client releases, hence configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub search_box: String,
    pub list_item: String,
    pub status_header: String,
    /// Attribute/property on `status_header` holding the full status text.
    pub status_property: String,
    pub logged_in_marker: String,
    /// Substring of a row's inline `style` identifying the first result slot.
    pub first_slot_marker: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            search_box: ".qh0vvdkp".to_string(),
            list_item: ".rx9719la".to_string(),
            status_header: "div.r15c9g6i:nth-child(2) > span:nth-child(1)".to_string(),
            status_property: "title".to_string(),
            logged_in_marker: ".qh0vvdkp".to_string(),
            first_slot_marker: "Y(72px)".to_string(),
        }
    }
}

/// Wait budgets, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delays {
    /// Upper bound for the page and search control to render.
    pub page_load_ms: u64,
    /// Pause between the search control appearing and typing into it.
    pub pre_input_ms: u64,
    pub search_floor_ms: u64,
    pub search_ceiling_ms: u64,
    pub header_floor_ms: u64,
    pub header_ceiling_ms: u64,
    /// How long setup waits for the operator to authenticate.
    pub login_timeout_ms: u64,
    pub poll_every_ms: u64,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            page_load_ms: 60_000,
            pre_input_ms: 2_000,
            search_floor_ms: 7_000,
            search_ceiling_ms: 20_000,
            header_floor_ms: 2_000,
            header_ceiling_ms: 15_000,
            login_timeout_ms: 300_000,
            poll_every_ms: 250,
        }
    }
}

impl Delays {
    /// No waiting at all; for driving fakes.
    pub fn immediate() -> Self {
        Self {
            page_load_ms: 0,
            pre_input_ms: 0,
            search_floor_ms: 0,
            search_ceiling_ms: 0,
            header_floor_ms: 0,
            header_ceiling_ms: 0,
            login_timeout_ms: 0,
            poll_every_ms: 1,
        }
    }

    fn every(&self) -> Duration {
        Duration::from_millis(self.poll_every_ms.max(1))
    }

    pub fn page_load(&self) -> Settle {
        Settle::new(Duration::ZERO, Duration::from_millis(self.page_load_ms), self.every())
    }

    pub fn pre_input(&self) -> Duration {
        Duration::from_millis(self.pre_input_ms)
    }

    pub fn search(&self) -> Settle {
        Settle::new(
            Duration::from_millis(self.search_floor_ms),
            Duration::from_millis(self.search_ceiling_ms),
            self.every(),
        )
    }

    pub fn header(&self) -> Settle {
        Settle::new(
            Duration::from_millis(self.header_floor_ms),
            Duration::from_millis(self.header_ceiling_ms),
            self.every(),
        )
    }

    pub fn login(&self) -> Settle {
        Settle::new(Duration::ZERO, Duration::from_millis(self.login_timeout_ms), self.every())
    }
}
