//! Polling & archival loop, plus the daemon wiring around it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lastseen_core::{ArchiveRecord, ErrorKind, PresenceSnapshot, Storage, WatchedSubject};
use lastseen_gateway::{DispatchError, Dispatcher};
use lastseen_store::Store;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::server::{self, ServerContext};

/// Outcome counts for one pass over the watch-set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub polled: usize,
    pub archived: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
enum SubjectError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("archive append failed: {0:#}")]
    Storage(anyhow::Error),
}

impl SubjectError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Dispatch(e) => e.kind(),
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Run the loop until `cancel` fires.
///
/// Cancellation is only observed between cycles: a cycle in flight always
/// runs to completion. The interval is slept after every cycle, including one
/// whose watch-set fetch failed.
pub async fn run_poll_loop<S: Storage + 'static>(
    dispatcher: Dispatcher,
    storage: Arc<S>,
    interval: Duration,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        match poll_cycle(&dispatcher, &storage).await {
            Ok(report) => tracing::debug!(
                polled = report.polled,
                archived = report.archived,
                failed = report.failed,
                "poll cycle complete"
            ),
            Err(e) => tracing::error!("failed to fetch watch-set: {e:#}"),
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    tracing::info!("poll loop stopped");
}

/// One pass: fetch the watch-set, then probe and archive each subject in
/// order. A failing subject is logged and skipped; only a failed fetch fails
/// the cycle.
pub async fn poll_cycle<S: Storage + 'static>(
    dispatcher: &Dispatcher,
    storage: &Arc<S>,
) -> anyhow::Result<CycleReport> {
    let store = Arc::clone(storage);
    let watched = tokio::task::spawn_blocking(move || store.list_watched()).await??;

    let mut report = CycleReport::default();
    for subject in &watched {
        report.polled += 1;
        match archive_subject(dispatcher, storage, subject).await {
            Ok(record) => {
                report.archived += 1;
                tracing::info!(
                    user = %subject.user,
                    source = %subject.source,
                    observed_at = %record.timestamp,
                    id = record.id,
                    "archived last-seen"
                );
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    user = %subject.user,
                    source = %subject.source,
                    kind = %e.kind(),
                    "poll failed: {e}"
                );
            }
        }
    }
    Ok(report)
}

async fn archive_subject<S: Storage + 'static>(
    dispatcher: &Dispatcher,
    storage: &Arc<S>,
    subject: &WatchedSubject,
) -> Result<ArchiveRecord, SubjectError> {
    let observed_at = dispatcher.get_status(&subject.user, &subject.source).await?;
    let snapshot = PresenceSnapshot::new(subject, observed_at);

    let store = Arc::clone(storage);
    match tokio::task::spawn_blocking(move || store.append_archive(&snapshot)).await {
        Ok(Ok(record)) => Ok(record),
        Ok(Err(e)) => Err(SubjectError::Storage(e.into())),
        Err(e) => Err(SubjectError::Storage(e.into())),
    }
}

/// Normal mode: poll loop + UDS server until ctrl-c or SIGTERM.
pub async fn run_daemon(config: Config, dispatcher: Dispatcher, socket_path: &str) -> anyhow::Result<()> {
    tracing::debug!(config = %serde_json::to_string(&config)?, "resolved configuration");

    let store = Arc::new(
        Store::open(&config.database_path)
            .with_context(|| format!("cannot open database {}", config.database_path.display()))?,
    );
    // Claim the socket before anything polls; a live daemon keeps its socket.
    let listener = server::bind_socket(socket_path).await?;
    let cancel = CancellationToken::new();

    let ctx = Arc::new(ServerContext {
        dispatcher: dispatcher.clone(),
        store: Arc::clone(&store),
    });
    let mut server_handle = tokio::spawn(server::run_server(listener, ctx));

    // Start poll loop
    let poll_cancel = cancel.clone();
    let interval = config.interval();
    tracing::info!(interval_secs = config.update_interval_secs, "poll loop starting");
    let mut poll_handle = tokio::spawn(async move {
        run_poll_loop(dispatcher, store, interval, poll_cancel).await;
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    let mut poll_running = true;
    let mut failure = None;
    tokio::select! {
        () = shutdown => {}
        joined = &mut poll_handle => {
            poll_running = false;
            failure = Some(match joined {
                Ok(()) => anyhow::anyhow!("poll loop exited unexpectedly"),
                Err(e) => anyhow::anyhow!("poll loop task failed: {e}"),
            });
        }
        joined = &mut server_handle => {
            failure = Some(match joined {
                Ok(Ok(())) => anyhow::anyhow!("UDS server exited unexpectedly"),
                Ok(Err(e)) => e.context("UDS server failed"),
                Err(e) => anyhow::anyhow!("UDS server task failed: {e}"),
            });
        }
    }

    // Stop new cycles; the one in flight finishes.
    cancel.cancel();
    if poll_running {
        if !poll_handle.is_finished() {
            tracing::info!("waiting for in-flight poll cycle");
        }
        let _ = poll_handle.await;
    }
    server_handle.abort();

    // The socket was bound by this process.
    let _ = std::fs::remove_file(socket_path);
    match failure {
        Some(e) => {
            tracing::error!("daemon stopped: {e:#}");
            Err(e)
        }
        None => {
            tracing::info!("daemon stopped");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use lastseen_core::{Probe, ProbeError};
    use lastseen_gateway::ProbeRegistry;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ─── Fakes ───────────────────────────────────────────────────────

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct FakeError(String);

    #[derive(Default)]
    struct FakeStorage {
        watched: Vec<WatchedSubject>,
        archive: Mutex<Vec<PresenceSnapshot>>,
        fail_list: bool,
        fail_append_for: Option<String>,
        list_calls: AtomicUsize,
    }

    impl FakeStorage {
        fn watching(subjects: &[(&str, &str)]) -> Self {
            Self {
                watched: subjects
                    .iter()
                    .map(|(u, s)| WatchedSubject::new(*u, *s))
                    .collect(),
                ..Self::default()
            }
        }

        fn archived_users(&self) -> Vec<String> {
            self.archive
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.user.clone())
                .collect()
        }
    }

    impl Storage for FakeStorage {
        type Error = FakeError;

        fn list_watched(&self) -> Result<Vec<WatchedSubject>, FakeError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_list {
                return Err(FakeError("database is locked".into()));
            }
            Ok(self.watched.clone())
        }

        fn append_archive(&self, snapshot: &PresenceSnapshot) -> Result<ArchiveRecord, FakeError> {
            if self.fail_append_for.as_deref() == Some(snapshot.user.as_str()) {
                return Err(FakeError("disk full".into()));
            }
            let mut archive = self.archive.lock().unwrap();
            archive.push(snapshot.clone());
            Ok(ArchiveRecord {
                id: archive.len() as i64,
                timestamp: snapshot.observed_at,
                source: snapshot.source.clone(),
                user: snapshot.user.clone(),
            })
        }
    }

    /// Answers from a fixed table; unknown users are `SubjectNotFound`.
    struct ScriptedProbe {
        name: &'static str,
        answers: HashMap<&'static str, Result<DateTime<Utc>, ProbeError>>,
        delay: Duration,
    }

    impl ScriptedProbe {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                answers: HashMap::new(),
                delay: Duration::ZERO,
            }
        }

        fn answer(mut self, user: &'static str, result: Result<DateTime<Utc>, ProbeError>) -> Self {
            self.answers.insert(user, result);
            self
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn initialize(&self) -> Result<(), ProbeError> {
            Ok(())
        }

        async fn get_status(&self, user: &str) -> Result<DateTime<Utc>, ProbeError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.answers
                .get(user)
                .cloned()
                .unwrap_or_else(|| Err(ProbeError::SubjectNotFound { user: user.into() }))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 10, 0, 0).unwrap()
    }

    fn dispatcher(probe: ScriptedProbe) -> Dispatcher {
        let mut registry = ProbeRegistry::new();
        registry.register(probe).unwrap();
        Dispatcher::new(registry)
    }

    // ─── poll_cycle ──────────────────────────────────────────────────

    #[tokio::test]
    async fn failing_subject_does_not_block_the_rest() {
        let dispatcher = dispatcher(
            ScriptedProbe::new("whatsapp")
                .answer("alice", Ok(t0()))
                .answer(
                    "bob",
                    Err(ProbeError::StatusUnrecognized {
                        status: "click here".into(),
                    }),
                )
                .answer("carol", Ok(t0())),
        );
        let storage = Arc::new(FakeStorage::watching(&[
            ("alice", "whatsapp"),
            ("bob", "whatsapp"),
            ("carol", "whatsapp"),
        ]));

        let report = poll_cycle(&dispatcher, &storage).await.unwrap();
        assert_eq!(
            report,
            CycleReport {
                polled: 3,
                archived: 2,
                failed: 1
            }
        );
        assert_eq!(storage.archived_users(), vec!["alice", "carol"]);
    }

    #[tokio::test]
    async fn unknown_source_is_a_per_subject_failure() {
        let dispatcher = dispatcher(ScriptedProbe::new("whatsapp").answer("alice", Ok(t0())));
        let storage = Arc::new(FakeStorage::watching(&[
            ("alice", "telegram"),
            ("alice", "whatsapp"),
        ]));

        let report = poll_cycle(&dispatcher, &storage).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.archived, 1);
        let archive = storage.archive.lock().unwrap();
        assert_eq!(archive[0].source, "whatsapp");
        assert_eq!(archive[0].observed_at, t0());
    }

    #[tokio::test]
    async fn append_failure_is_isolated() {
        let dispatcher = dispatcher(
            ScriptedProbe::new("whatsapp")
                .answer("alice", Ok(t0()))
                .answer("bob", Ok(t0())),
        );
        let storage = Arc::new(FakeStorage {
            fail_append_for: Some("alice".into()),
            ..FakeStorage::watching(&[("alice", "whatsapp"), ("bob", "whatsapp")])
        });

        let report = poll_cycle(&dispatcher, &storage).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(storage.archived_users(), vec!["bob"]);
    }

    #[tokio::test]
    async fn fetch_failure_fails_the_cycle() {
        let dispatcher = dispatcher(ScriptedProbe::new("whatsapp"));
        let storage = Arc::new(FakeStorage {
            fail_list: true,
            ..FakeStorage::default()
        });
        let err = poll_cycle(&dispatcher, &storage).await.unwrap_err();
        assert!(err.to_string().contains("locked"));
    }

    #[tokio::test]
    async fn empty_watch_set_is_a_quiet_cycle() {
        let dispatcher = dispatcher(ScriptedProbe::new("whatsapp"));
        let storage = Arc::new(FakeStorage::default());
        assert_eq!(
            poll_cycle(&dispatcher, &storage).await.unwrap(),
            CycleReport::default()
        );
    }

    #[test]
    fn subject_error_kinds() {
        let not_found = SubjectError::from(DispatchError::ProbeNotFound {
            source_name: "telegram".into(),
        });
        assert_eq!(not_found.kind(), ErrorKind::ProbeNotFound);
        let storage = SubjectError::Storage(anyhow::anyhow!("disk full"));
        assert_eq!(storage.kind(), ErrorKind::Storage);
    }

    // ─── run_poll_loop ───────────────────────────────────────────────

    #[tokio::test]
    async fn fetch_failure_still_waits_the_interval() {
        let dispatcher = dispatcher(ScriptedProbe::new("whatsapp"));
        let storage = Arc::new(FakeStorage {
            fail_list: true,
            ..FakeStorage::default()
        });
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_poll_loop(
            dispatcher,
            Arc::clone(&storage),
            Duration::from_millis(50),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(175)).await;
        cancel.cancel();
        handle.await.unwrap();

        let attempts = storage.list_calls.load(Ordering::SeqCst);
        assert!((1..=5).contains(&attempts), "fetch retried {attempts} times");
    }

    #[tokio::test]
    async fn cancel_interrupts_the_sleep() {
        let dispatcher = dispatcher(ScriptedProbe::new("whatsapp").answer("alice", Ok(t0())));
        let storage = Arc::new(FakeStorage::watching(&[("alice", "whatsapp")]));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_poll_loop(
            dispatcher,
            Arc::clone(&storage),
            Duration::from_secs(3600),
            cancel.clone(),
        ));
        while storage.archived_users().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop promptly")
            .unwrap();
        assert_eq!(storage.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_lets_in_flight_cycle_finish() {
        let mut probe = ScriptedProbe::new("whatsapp").answer("alice", Ok(t0()));
        probe.delay = Duration::from_millis(100);
        let storage = Arc::new(FakeStorage::watching(&[("alice", "whatsapp")]));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_poll_loop(
            dispatcher(probe),
            Arc::clone(&storage),
            Duration::from_secs(3600),
            cancel.clone(),
        ));
        while storage.list_calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(storage.archived_users(), vec!["alice"]);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let storage = Arc::new(FakeStorage::watching(&[("alice", "whatsapp")]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        run_poll_loop(
            dispatcher(ScriptedProbe::new("whatsapp")),
            Arc::clone(&storage),
            Duration::from_secs(1),
            cancel,
        )
        .await;
        assert_eq!(storage.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_daemon_refuses_a_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("lastseend.sock");
        let socket = socket.to_str().unwrap().to_string();
        let database_path = dir.path().join("lastseen.db");
        {
            let store = Store::open(&database_path).unwrap();
            store.watch("alice", "whatsapp").unwrap();
        }
        let _live = server::bind_socket(&socket).await.unwrap();

        let config = Config {
            database_path: database_path.clone(),
            update_interval_secs: 1,
            ..Config::default()
        };
        let probe = ScriptedProbe::new("whatsapp").answer("alice", Ok(t0()));
        let err = run_daemon(config, dispatcher(probe), &socket)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("already running"), "{err:#}");
        assert!(std::path::Path::new(&socket).exists());
        let store = Store::open(&database_path).unwrap();
        assert!(store.archive_by_user("alice").unwrap().is_empty());
    }
}
