use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProbeError;

/// Capability contract every presence source implements.
///
/// The registry treats all probes uniformly through this trait; anything
/// source-specific stays inside the implementation.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Routing key. Non-empty and unique within a registry.
    fn name(&self) -> &str;

    /// One-time, possibly interactive session bootstrap. Only called in setup
    /// mode. May persist session state to disk for later `get_status` calls.
    async fn initialize(&self) -> Result<(), ProbeError>;

    /// Best-known instant of last activity for `user` on this source.
    ///
    /// May block for tens of seconds. Must release any session resources it
    /// acquired before returning, on every path.
    async fn get_status(&self, user: &str) -> Result<DateTime<Utc>, ProbeError>;
}
