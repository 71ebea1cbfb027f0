//! lastseen-gateway: probe registry and dispatcher.
//! Routes (user, source) status requests to the probe registered under the
//! source name, serializing calls per source.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{DispatchError, Dispatcher};
pub use registry::{ProbeRegistry, RegistryError};
