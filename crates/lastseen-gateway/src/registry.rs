//! Probe registry: built once at startup, read-only afterwards.

use std::sync::Arc;

use lastseen_core::Probe;
use thiserror::Error;
use tokio::sync::Mutex;

/// Configuration defects detected while building the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("probe name must not be empty")]
    EmptyName,

    #[error("a probe named {0:?} is already registered")]
    DuplicateName(String),
}

/// A registered probe plus the lock that serializes calls against its
/// external session resource (e.g. a shared browser profile).
pub(crate) struct Slot {
    pub(crate) probe: Arc<dyn Probe>,
    pub(crate) session_lock: Mutex<()>,
}

/// Ordered set of probes keyed by their unique name.
///
/// No interior mutation after construction; lookups are safe from any number
/// of concurrent callers.
#[derive(Default)]
pub struct ProbeRegistry {
    slots: Vec<Slot>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a probe. Names must be non-empty and unique.
    pub fn register(&mut self, probe: impl Probe + 'static) -> Result<(), RegistryError> {
        self.register_shared(Arc::new(probe))
    }

    pub fn register_shared(&mut self, probe: Arc<dyn Probe>) -> Result<(), RegistryError> {
        let name = probe.name();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.find(name).is_some() {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }

        tracing::debug!(probe = name, "registered probe");
        self.slots.push(Slot {
            probe,
            session_lock: Mutex::new(()),
        });
        Ok(())
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.probe.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn find(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.probe.name() == name)
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("probes", &self.names())
            .finish()
    }
}
