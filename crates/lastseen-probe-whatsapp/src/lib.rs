//! lastseen-probe-whatsapp: chat-presence scraper for WhatsApp Web.
//!
//! Drives a Chromium session against the web client, finds the subject in the
//! virtualized chat list, reads the conversation header's status tooltip and
//! resolves it to an instant. The browser sits behind the [`ChatDriver`] /
//! [`ChatSession`] seam so the state machine is testable without Chromium.

pub mod chrome;
pub mod config;
pub mod probe;
pub mod session;
pub mod settle;

pub use chrome::{ChromeDriver, ChromeSession};
pub use config::{Delays, Selectors, UnknownLocale, WhatsAppConfig};
pub use probe::{PROBE_NAME, WhatsAppProbe, select_match};
pub use session::{ChatDriver, ChatSession, LaunchMode, ListItem};
pub use settle::Settle;
