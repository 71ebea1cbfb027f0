//! Browser automation seam. Enables fake injection for testing.

use async_trait::async_trait;
use lastseen_core::ProbeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// No window; used for status queries.
    Headless,
    /// Visible window the operator can interact with; used for setup.
    Interactive,
}

/// One rendered row of the chat list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    /// Position in DOM enumeration order.
    pub index: usize,
    /// Inline `style` attribute, carrying the row's absolute position.
    pub style: Option<String>,
}

impl ListItem {
    pub fn new(index: usize, style: Option<&str>) -> Self {
        Self {
            index,
            style: style.map(str::to_string),
        }
    }
}

/// Opens sessions against the chat web client.
#[async_trait]
pub trait ChatDriver: Send + Sync {
    type Session: ChatSession;

    /// Launch a browser on the persistent profile and navigate to the client.
    async fn open(&self, mode: LaunchMode) -> Result<Self::Session, ProbeError>;
}

/// DOM operations the probe needs, addressed by CSS selector.
#[async_trait]
pub trait ChatSession: Send + Sync + Sized {
    async fn exists(&self, selector: &str) -> Result<bool, ProbeError>;

    /// Focus the element and type `text` into it.
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), ProbeError>;

    async fn list_items(&self, selector: &str) -> Result<Vec<ListItem>, ProbeError>;

    /// Click the `index`-th element matching `selector`.
    async fn click_item(&self, selector: &str, index: usize) -> Result<(), ProbeError>;

    /// String value of a DOM property (e.g. `title`) of the first match.
    /// `None` when the element or property is absent.
    async fn read_property(&self, selector: &str, property: &str)
    -> Result<Option<String>, ProbeError>;

    /// Tear the browser down.
    async fn close(self) -> Result<(), ProbeError>;

    /// Leave the browser to the operator and return once they close it.
    async fn hand_over(self) -> Result<(), ProbeError>;
}
