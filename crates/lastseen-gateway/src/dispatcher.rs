//! Dispatcher: keyed routing of status requests onto registered probes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lastseen_core::{ErrorKind, ProbeError};
use thiserror::Error;

use crate::registry::{ProbeRegistry, Slot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no probe registered for source {source_name:?}")]
    ProbeNotFound { source_name: String },

    #[error("{source_name}: {error}")]
    Probe {
        source_name: String,
        #[source]
        error: ProbeError,
    },
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProbeNotFound { .. } => ErrorKind::ProbeNotFound,
            Self::Probe { error, .. } => error.kind(),
        }
    }
}

/// Cheap-to-clone handle shared by the poll loop and the on-demand server.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ProbeRegistry>,
}

impl Dispatcher {
    pub fn new(registry: ProbeRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Registered source names in registration order.
    pub fn sources(&self) -> Vec<String> {
        self.registry.names().into_iter().map(String::from).collect()
    }

    /// Query the probe registered under `source`.
    ///
    /// Concurrent calls for the same source queue behind each other; calls
    /// for different sources run in parallel.
    pub async fn get_status(&self, user: &str, source: &str) -> Result<DateTime<Utc>, DispatchError> {
        let slot = self
            .registry
            .find(source)
            .ok_or_else(|| DispatchError::ProbeNotFound {
                source_name: source.to_string(),
            })?;
        query(slot, user).await
    }

    /// Query every registered probe for `user`, in registration order.
    ///
    /// Fails on the first probe error without collecting partial results.
    pub async fn get_all_statuses(
        &self,
        user: &str,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, DispatchError> {
        let mut statuses = BTreeMap::new();
        for slot in self.registry.slots() {
            let observed_at = query(slot, user).await?;
            statuses.insert(slot.probe.name().to_string(), observed_at);
        }
        Ok(statuses)
    }

    /// Setup mode: run every probe's one-time bootstrap, stopping at the
    /// first failure.
    pub async fn initialize_all(&self) -> Result<(), DispatchError> {
        for slot in self.registry.slots() {
            let source = slot.probe.name();
            tracing::info!(source, "initializing probe");
            let _guard = slot.session_lock.lock().await;
            slot.probe
                .initialize()
                .await
                .map_err(|error| DispatchError::Probe {
                    source_name: source.to_string(),
                    error,
                })?;
            tracing::info!(source, "probe initialized");
        }
        Ok(())
    }
}

async fn query(slot: &Slot, user: &str) -> Result<DateTime<Utc>, DispatchError> {
    let source = slot.probe.name();
    let _guard = slot.session_lock.lock().await;
    slot.probe
        .get_status(user)
        .await
        .map_err(|error| DispatchError::Probe {
            source_name: source.to_string(),
            error,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use lastseen_core::Probe;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Barrier;

    /// Probe that records each call and returns a fixed outcome.
    struct RecordingProbe {
        name: &'static str,
        outcome: Result<DateTime<Utc>, ProbeError>,
        calls: Arc<StdMutex<Vec<String>>>,
    }

    impl RecordingProbe {
        fn ok(name: &'static str, at: DateTime<Utc>, calls: &Arc<StdMutex<Vec<String>>>) -> Self {
            Self {
                name,
                outcome: Ok(at),
                calls: Arc::clone(calls),
            }
        }

        fn failing(name: &'static str, error: ProbeError, calls: &Arc<StdMutex<Vec<String>>>) -> Self {
            Self {
                name,
                outcome: Err(error),
                calls: Arc::clone(calls),
            }
        }
    }

    #[async_trait]
    impl Probe for RecordingProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn initialize(&self) -> Result<(), ProbeError> {
            self.calls.lock().unwrap().push(format!("init:{}", self.name));
            self.outcome.clone().map(|_| ())
        }

        async fn get_status(&self, user: &str) -> Result<DateTime<Utc>, ProbeError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{user}", self.name));
            self.outcome.clone()
        }
    }

    /// Probe that tracks how many of its calls overlap in time.
    struct OverlapProbe {
        name: &'static str,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        barrier: Option<Arc<Barrier>>,
    }

    impl OverlapProbe {
        fn new(name: &'static str, barrier: Option<Arc<Barrier>>) -> Self {
            Self {
                name,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                barrier,
            }
        }
    }

    #[async_trait]
    impl Probe for OverlapProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn initialize(&self) -> Result<(), ProbeError> {
            Ok(())
        }

        async fn get_status(&self, _user: &str) -> Result<DateTime<Utc>, ProbeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            match &self.barrier {
                Some(barrier) => {
                    barrier.wait().await;
                }
                None => tokio::time::sleep(Duration::from_millis(20)).await,
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Utc::now())
        }
    }

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, hour, 0, 0).unwrap()
    }

    fn calls() -> Arc<StdMutex<Vec<String>>> {
        Arc::new(StdMutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn routes_to_exactly_the_named_probe() {
        let log = calls();
        let mut registry = ProbeRegistry::new();
        registry.register(RecordingProbe::ok("whatsapp", t(1), &log)).unwrap();
        registry.register(RecordingProbe::ok("signal", t(2), &log)).unwrap();
        let dispatcher = Dispatcher::new(registry);

        assert_eq!(dispatcher.get_status("alice", "signal").await, Ok(t(2)));
        assert_eq!(dispatcher.get_status("bob", "whatsapp").await, Ok(t(1)));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["signal:alice".to_string(), "whatsapp:bob".to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_source_is_probe_not_found_for_any_user() {
        let log = calls();
        let mut registry = ProbeRegistry::new();
        registry.register(RecordingProbe::ok("whatsapp", t(1), &log)).unwrap();
        let dispatcher = Dispatcher::new(registry);

        for user in ["alice", "", "whatsapp"] {
            let err = dispatcher.get_status(user, "unknown-source").await.unwrap_err();
            assert_eq!(
                err,
                DispatchError::ProbeNotFound {
                    source_name: "unknown-source".into()
                }
            );
            assert_eq!(err.kind(), ErrorKind::ProbeNotFound);
        }
        assert!(log.lock().unwrap().is_empty(), "no probe may be invoked");
    }

    #[tokio::test]
    async fn probe_errors_propagate_unchanged() {
        let log = calls();
        let mut registry = ProbeRegistry::new();
        registry
            .register(RecordingProbe::failing(
                "whatsapp",
                ProbeError::SubjectNotFound { user: "zed".into() },
                &log,
            ))
            .unwrap();
        let dispatcher = Dispatcher::new(registry);

        let err = dispatcher.get_status("zed", "whatsapp").await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::Probe {
                source_name: "whatsapp".into(),
                error: ProbeError::SubjectNotFound { user: "zed".into() },
            }
        );
        assert_eq!(err.kind(), ErrorKind::SubjectNotFound);
    }

    #[tokio::test]
    async fn get_all_statuses_collects_every_source() {
        let log = calls();
        let mut registry = ProbeRegistry::new();
        registry.register(RecordingProbe::ok("whatsapp", t(1), &log)).unwrap();
        registry.register(RecordingProbe::ok("signal", t(2), &log)).unwrap();
        let dispatcher = Dispatcher::new(registry);

        let all = dispatcher.get_all_statuses("alice").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["whatsapp"], t(1));
        assert_eq!(all["signal"], t(2));
    }

    #[tokio::test]
    async fn get_all_statuses_fails_fast() {
        let log = calls();
        let mut registry = ProbeRegistry::new();
        registry.register(RecordingProbe::ok("whatsapp", t(1), &log)).unwrap();
        registry
            .register(RecordingProbe::failing(
                "signal",
                ProbeError::session("browser crashed"),
                &log,
            ))
            .unwrap();
        registry.register(RecordingProbe::ok("telegram", t(3), &log)).unwrap();
        let dispatcher = Dispatcher::new(registry);

        let err = dispatcher.get_all_statuses("alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionUnavailable);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["whatsapp:alice".to_string(), "signal:alice".to_string()],
            "telegram must not be queried after signal failed"
        );
    }

    #[tokio::test]
    async fn initialize_all_stops_at_first_failure() {
        let log = calls();
        let mut registry = ProbeRegistry::new();
        registry
            .register(RecordingProbe::failing(
                "whatsapp",
                ProbeError::session("login timed out"),
                &log,
            ))
            .unwrap();
        registry.register(RecordingProbe::ok("signal", t(2), &log)).unwrap();
        let dispatcher = Dispatcher::new(registry);

        assert!(dispatcher.initialize_all().await.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["init:whatsapp".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_source_calls_are_serialized() {
        let probe = Arc::new(OverlapProbe::new("whatsapp", None));
        let mut registry = ProbeRegistry::new();
        registry.register_shared(Arc::clone(&probe) as Arc<dyn Probe>).unwrap();
        let dispatcher = Dispatcher::new(registry);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let d = dispatcher.clone();
                tokio::spawn(async move { d.get_status(&format!("user{i}"), "whatsapp").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn different_sources_run_in_parallel() {
        // Each probe blocks until both are in flight; serialization across
        // sources would deadlock and trip the timeout.
        let barrier = Arc::new(Barrier::new(2));
        let mut registry = ProbeRegistry::new();
        registry
            .register(OverlapProbe::new("whatsapp", Some(Arc::clone(&barrier))))
            .unwrap();
        registry
            .register(OverlapProbe::new("signal", Some(Arc::clone(&barrier))))
            .unwrap();
        let dispatcher = Dispatcher::new(registry);

        let a = dispatcher.clone();
        let b = dispatcher.clone();
        let both = async move {
            tokio::join!(
                a.get_status("alice", "whatsapp"),
                b.get_status("alice", "signal")
            )
        };
        let (ra, rb) = tokio::time::timeout(Duration::from_secs(5), both)
            .await
            .expect("calls on different sources must overlap");
        assert!(ra.is_ok());
        assert!(rb.is_ok());
    }
}
