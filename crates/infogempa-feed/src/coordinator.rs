//! Refresh coordinator: owns the live snapshot of one feed, refreshes it on
//! start, on a timer and on reconnect, and falls back to the persisted copy
//! when a fetch fails.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::FeedError;
use crate::source::{FeedSource, Fetched};
use crate::storage::KeyValueStore;

/// Where the held snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    Network,
    /// Loaded from durable storage after a failed fetch
    Persisted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub data: T,
    /// `None` when restored without a readable timestamp
    pub captured_at: Option<DateTime<Utc>>,
    pub origin: SnapshotOrigin,
}

impl<T> Snapshot<T> {
    pub fn age_minutes(&self) -> Option<i64> {
        self.captured_at
            .map(|at| (Utc::now() - at).num_minutes())
    }

    /// "just now", "5m ago", "2h ago", "3d ago"
    pub fn age_display(&self) -> Option<String> {
        let minutes = self.age_minutes()?;
        let display = if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        };
        Some(display)
    }
}

/// What consumers see: the held snapshot (fresh or stale) and the last error.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedState<T> {
    pub snapshot: Option<Snapshot<T>>,
    pub error: Option<String>,
    pub loading: bool,
    pub online: bool,
}

impl<T> FeedState<T> {
    fn new(online: bool) -> Self {
        Self {
            snapshot: None,
            error: None,
            loading: false,
            online,
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.snapshot.as_ref().map(|s| &s.data)
    }

    /// Stale data shown next to an error
    pub fn is_degraded(&self) -> bool {
        self.snapshot.is_some() && self.error.is_some()
    }
}

/// Result of a single refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    Failed,
    /// A refresh started later has already committed; this result was dropped
    Superseded,
}

struct Inner<S: FeedSource> {
    source: S,
    store: Arc<dyn KeyValueStore>,
    state: watch::Sender<FeedState<S::Data>>,
    next_seq: AtomicU64,
    committed: Mutex<u64>,
    in_flight: AtomicUsize,
}

impl<S: FeedSource> Inner<S> {
    async fn refresh(&self) -> RefreshOutcome {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = InFlight::enter(self);

        tracing::debug!("Refreshing {} (#{})", self.source.name(), seq);
        let result = self.source.fetch().await;

        let still_running = guard.finish();
        self.commit(seq, result, still_running)
    }

    fn set_loading(&self, loading: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.loading != loading;
            state.loading = loading;
            changed
        });
    }

    fn commit(
        &self,
        seq: u64,
        result: Result<Fetched<S::Data>, FeedError>,
        still_running: bool,
    ) -> RefreshOutcome {
        let mut committed = self.committed.lock();
        if seq < *committed {
            tracing::debug!(
                "Dropping {} refresh #{}: #{} already committed",
                self.source.name(),
                seq,
                *committed
            );
            self.set_loading(still_running);
            return RefreshOutcome::Superseded;
        }
        *committed = seq;

        match result {
            Ok(fetched) => {
                let captured_at = Utc::now().trunc_subsecs(3);
                self.persist(&fetched, captured_at);
                self.state.send_modify(|state| {
                    state.snapshot = Some(Snapshot {
                        data: fetched.data,
                        captured_at: Some(captured_at),
                        origin: SnapshotOrigin::Network,
                    });
                    state.error = None;
                    state.loading = still_running;
                });
                tracing::info!("{} updated", self.source.name());
                RefreshOutcome::Updated
            }
            Err(e) => {
                tracing::warn!("{} refresh failed: {}", self.source.name(), e);
                let restored = if self.state.borrow().snapshot.is_none() {
                    self.restore()
                } else {
                    None
                };
                self.state.send_modify(|state| {
                    state.error = Some(e.user_message());
                    if state.snapshot.is_none() {
                        state.snapshot = restored;
                    }
                    state.loading = still_running;
                });
                RefreshOutcome::Failed
            }
        }
    }

    fn persist(&self, fetched: &Fetched<S::Data>, captured_at: DateTime<Utc>) {
        let mut entries: Vec<(&str, String)> = fetched
            .records
            .iter()
            .map(|(key, value)| (*key, value.clone()))
            .collect();
        entries.push((
            self.source.timestamp_key(),
            captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        ));

        if let Err(e) = self.store.set_many(&entries) {
            tracing::warn!("Failed to persist {} snapshot: {}", self.source.name(), e);
        }
    }

    fn restore(&self) -> Option<Snapshot<S::Data>> {
        let data = match self.source.restore(self.store.as_ref()) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Stored {} snapshot unusable: {}", self.source.name(), e);
                return None;
            }
        };

        let captured_at = self
            .store
            .get(self.source.timestamp_key())
            .ok()
            .flatten()
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|at| at.with_timezone(&Utc));

        tracing::info!("Showing stored {} snapshot", self.source.name());
        Some(Snapshot {
            data,
            captured_at,
            origin: SnapshotOrigin::Persisted,
        })
    }

    fn set_online(&self, online: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.online != online;
            state.online = online;
            changed
        });
    }
}

/// Counts one running refresh. A refresh future dropped mid-fetch (driver
/// cancelled or replaced) still leaves the count, and `loading`, correct.
struct InFlight<'a, S: FeedSource> {
    inner: &'a Inner<S>,
    done: bool,
}

impl<'a, S: FeedSource> InFlight<'a, S> {
    fn enter(inner: &'a Inner<S>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        inner.set_loading(true);
        Self { inner, done: false }
    }

    /// Leave normally; returns whether other refreshes are still running.
    fn finish(mut self) -> bool {
        self.done = true;
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) > 1
    }
}

impl<S: FeedSource> Drop for InFlight<'_, S> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.set_loading(false);
        }
    }
}

/// Handle for user-invoked retries, cheap to clone and hand to the UI.
pub struct RetryHandle<S: FeedSource> {
    inner: Arc<Inner<S>>,
}

impl<S: FeedSource> Clone for RetryHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: FeedSource> RetryHandle<S> {
    pub async fn retry(&self) -> RefreshOutcome {
        self.inner.refresh().await
    }
}

/// Keeps one feed's snapshot fresh.
///
/// Dropping the coordinator stops its timer.
pub struct FeedCoordinator<S: FeedSource> {
    inner: Arc<Inner<S>>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<S: FeedSource> FeedCoordinator<S> {
    /// Create a coordinator without starting its timer.
    pub fn new(source: S, store: Arc<dyn KeyValueStore>, online: bool) -> Self {
        let (state, _) = watch::channel(FeedState::new(online));
        Self {
            inner: Arc::new(Inner {
                source,
                store,
                state,
                next_seq: AtomicU64::new(0),
                committed: Mutex::new(0),
                in_flight: AtomicUsize::new(0),
            }),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        }
    }

    /// Create a coordinator, load immediately, and refresh every `period`
    /// while `online` says so.
    pub fn start(
        source: S,
        store: Arc<dyn KeyValueStore>,
        online: watch::Receiver<bool>,
        period: Duration,
    ) -> Self {
        let coordinator = Self::new(source, store, *online.borrow());
        coordinator.spawn_driver(online, period);
        coordinator
    }

    /// Start the load/timer/reconnect loop. Replaces any running loop.
    pub fn spawn_driver(&self, online: watch::Receiver<bool>, period: Duration) {
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(drive(inner, online, period, cancel));
        if let Some(previous) = self.driver.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Run one refresh now (retry).
    pub async fn refresh(&self) -> RefreshOutcome {
        self.inner.refresh().await
    }

    pub fn retry_handle(&self) -> RetryHandle<S> {
        RetryHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState<S::Data>> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> FeedState<S::Data> {
        self.inner.state.borrow().clone()
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Stop the timer and wait for the loop to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!("{} driver ended abnormally: {}", self.inner.source.name(), e);
                }
            }
        }
    }
}

impl<S: FeedSource> Drop for FeedCoordinator<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drive<S: FeedSource>(
    inner: Arc<Inner<S>>,
    mut online: watch::Receiver<bool>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut was_online = *online.borrow_and_update();
    inner.set_online(was_online);

    // Initial load runs even offline so a stored snapshot gets picked up
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = inner.refresh() => {}
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut watching = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !*online.borrow() {
                    tracing::debug!("Offline, skipping scheduled {} refresh", inner.source.name());
                    continue;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = inner.refresh() => {}
                }
            }
            changed = online.changed(), if watching => {
                if changed.is_err() {
                    // Connectivity source gone; keep the last known state
                    watching = false;
                    continue;
                }
                let now_online = *online.borrow_and_update();
                inner.set_online(now_online);

                if now_online && !was_online {
                    tracing::info!("Back online, refreshing {}", inner.source.name());
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = inner.refresh() => {}
                    }
                    ticker.reset();
                }
                was_online = now_online;
            }
        }
    }

    tracing::debug!("{} refresh loop stopped", inner.source.name());
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::storage::SqliteKeyValueStore;
    use infogempa_shell::ShellError;
    use std::collections::VecDeque;

    const DATA_KEY: &str = "testData";
    const TIME_KEY: &str = "testLastUpdate";

    /// Scripted source: each call pops the next (delay, result) step.
    /// When the script runs out, calls succeed with "fresh".
    struct Scripted {
        calls: AtomicUsize,
        steps: Mutex<VecDeque<(Duration, Result<String, ()>)>>,
    }

    impl Scripted {
        fn new(steps: Vec<(Duration, Result<String, ()>)>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                steps: Mutex::new(steps.into()),
            }
        }

        fn always_ok() -> Self {
            Self::new(Vec::new())
        }
    }

    impl FeedSource for Scripted {
        type Data = String;

        fn name(&self) -> &'static str {
            "test"
        }

        fn timestamp_key(&self) -> &'static str {
            TIME_KEY
        }

        async fn fetch(&self) -> Result<Fetched<String>, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (delay, result) = self
                .steps
                .lock()
                .pop_front()
                .unwrap_or((Duration::ZERO, Ok("fresh".to_string())));
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match result {
                Ok(data) => Ok(Fetched {
                    records: vec![(DATA_KEY, data.clone())],
                    data,
                }),
                Err(()) => Err(ShellError::Unreachable("offline".into()).into()),
            }
        }

        fn restore(&self, store: &dyn KeyValueStore) -> Result<Option<String>, FeedError> {
            Ok(store.get(DATA_KEY)?)
        }
    }

    fn store() -> Arc<dyn KeyValueStore> {
        Arc::new(SqliteKeyValueStore::in_memory().unwrap())
    }

    fn calls(c: &FeedCoordinator<Scripted>) -> usize {
        c.source().calls.load(Ordering::SeqCst)
    }

    fn fail() -> (Duration, Result<String, ()>) {
        (Duration::ZERO, Err(()))
    }

    fn ok(data: &str) -> (Duration, Result<String, ()>) {
        (Duration::ZERO, Ok(data.to_string()))
    }

    #[tokio::test]
    async fn test_success_persists_snapshot_and_timestamp() {
        let store = store();
        let coordinator = FeedCoordinator::new(Scripted::new(vec![ok("A")]), store.clone(), true);

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Updated);

        let state = coordinator.state();
        let snapshot = state.snapshot.unwrap();
        assert_eq!(snapshot.data, "A");
        assert_eq!(snapshot.origin, SnapshotOrigin::Network);
        assert!(state.error.is_none());
        assert!(!state.loading);

        assert_eq!(store.get(DATA_KEY).unwrap().as_deref(), Some("A"));
        let stored_at = store.get(TIME_KEY).unwrap().unwrap();
        let stored_at = DateTime::parse_from_rfc3339(&stored_at)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(Some(stored_at), snapshot.captured_at);
    }

    #[tokio::test]
    async fn test_failure_without_anything_stored() {
        let coordinator = FeedCoordinator::new(Scripted::new(vec![fail()]), store(), true);

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Failed);

        let state = coordinator.state();
        assert!(state.snapshot.is_none());
        assert!(state.error.unwrap().contains("internet connection"));
    }

    #[tokio::test]
    async fn test_failure_adopts_persisted_snapshot() {
        let store = store();
        store
            .set_many(&[
                (DATA_KEY, "stored".to_string()),
                (TIME_KEY, "2024-01-01T00:00:00.000Z".to_string()),
            ])
            .unwrap();

        let coordinator = FeedCoordinator::new(Scripted::new(vec![fail()]), store, true);
        coordinator.refresh().await;

        let state = coordinator.state();
        let snapshot = state.snapshot.clone().unwrap();
        assert_eq!(snapshot.data, "stored");
        assert_eq!(snapshot.origin, SnapshotOrigin::Persisted);
        assert_eq!(
            snapshot.captured_at.unwrap().to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );
        assert!(state.is_degraded());
    }

    #[tokio::test]
    async fn test_failure_keeps_existing_snapshot() {
        let store = store();
        let coordinator =
            FeedCoordinator::new(Scripted::new(vec![ok("A"), fail()]), store.clone(), true);

        coordinator.refresh().await;
        let before = coordinator.state().snapshot;

        // Stored data must not replace what is already held
        store.set(DATA_KEY, "other").unwrap();
        assert_eq!(coordinator.refresh().await, RefreshOutcome::Failed);

        let state = coordinator.state();
        assert_eq!(state.snapshot, before);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_success_clears_error() {
        let coordinator = FeedCoordinator::new(Scripted::new(vec![fail(), ok("B")]), store(), true);
        coordinator.refresh().await;
        assert!(coordinator.state().error.is_some());

        coordinator.refresh().await;
        let state = coordinator.state();
        assert!(state.error.is_none());
        assert_eq!(state.data().map(String::as_str), Some("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_refresh_cannot_overwrite_newer() {
        let coordinator = FeedCoordinator::new(
            Scripted::new(vec![
                (Duration::from_secs(2), Ok("old".to_string())),
                ok("new"),
            ]),
            store(),
            true,
        );

        let (first, second) = tokio::join!(coordinator.refresh(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            coordinator.refresh().await
        });

        assert_eq!(second, RefreshOutcome::Updated);
        assert_eq!(first, RefreshOutcome::Superseded);
        let state = coordinator.state();
        assert_eq!(state.data().map(String::as_str), Some("new"));
        assert!(!state.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_loads_immediately_and_on_schedule() {
        let (_tx, rx) = watch::channel(true);
        let coordinator = FeedCoordinator::start(
            Scripted::always_ok(),
            store(),
            rx,
            Duration::from_secs(300),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls(&coordinator), 1);
        assert!(coordinator.state().snapshot.is_some());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(calls(&coordinator), 2);

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_skips_schedule_and_reconnect_refreshes_once() {
        let (tx, rx) = watch::channel(true);
        let coordinator = FeedCoordinator::start(
            Scripted::always_ok(),
            store(),
            rx,
            Duration::from_secs(300),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls(&coordinator), 1);

        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(calls(&coordinator), 1);
        assert!(!coordinator.state().online);

        // t = 300.010s: back online
        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls(&coordinator), 2);
        assert!(coordinator.state().online);

        // The old schedule (t = 600.000s) no longer applies
        tokio::time::sleep(Duration::from_millis(299_985)).await;
        assert_eq!(calls(&coordinator), 2);

        // Interval restarted at the reconnect (t = 600.010s)
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls(&coordinator), 3);

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_load_offline_uses_stored_snapshot() {
        let store = store();
        store.set(DATA_KEY, "yesterday").unwrap();

        let (_tx, rx) = watch::channel(false);
        let coordinator = FeedCoordinator::start(
            Scripted::new(vec![fail()]),
            store,
            rx,
            Duration::from_secs(300),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let state = coordinator.state();
        assert!(!state.online);
        assert_eq!(state.data().map(String::as_str), Some("yesterday"));
        assert!(state.error.is_some());
        // No readable timestamp stored
        assert!(state.snapshot.unwrap().captured_at.is_none());

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timer() {
        let (_tx, rx) = watch::channel(true);
        let coordinator = FeedCoordinator::start(
            Scripted::always_ok(),
            store(),
            rx,
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.shutdown().await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(calls(&coordinator), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_refresh_does_not_leave_loading_set() {
        let (_tx, rx) = watch::channel(true);
        let coordinator = FeedCoordinator::start(
            Scripted::new(vec![(Duration::from_secs(10), Ok("slow".to_string()))]),
            store(),
            rx,
            Duration::from_secs(300),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.state().loading);

        // Stops the initial load mid-fetch
        coordinator.shutdown().await;
        assert!(!coordinator.state().loading);

        let retry = coordinator.retry_handle();
        assert_eq!(retry.retry().await, RefreshOutcome::Updated);

        let state = coordinator.state();
        assert!(!state.loading);
        assert_eq!(state.data().map(String::as_str), Some("fresh"));
    }

    #[tokio::test]
    async fn test_retry_handle_shares_state() {
        let coordinator = FeedCoordinator::new(Scripted::new(vec![ok("A")]), store(), true);
        let retry = coordinator.retry_handle();
        let mut rx = coordinator.subscribe();

        assert_eq!(retry.retry().await, RefreshOutcome::Updated);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().data().map(String::as_str), Some("A"));
    }

    #[test]
    fn test_age_display() {
        let snapshot = |minutes: i64| Snapshot {
            data: (),
            captured_at: Some(Utc::now() - chrono::Duration::minutes(minutes)),
            origin: SnapshotOrigin::Network,
        };
        assert_eq!(snapshot(0).age_display().unwrap(), "just now");
        assert_eq!(snapshot(5).age_display().unwrap(), "5m ago");
        assert_eq!(snapshot(150).age_display().unwrap(), "3h ago");
        assert_eq!(snapshot(60 * 24 * 3).age_display().unwrap(), "3d ago");

        let unknown: Snapshot<()> = Snapshot {
            data: (),
            captured_at: None,
            origin: SnapshotOrigin::Persisted,
        };
        assert_eq!(unknown.age_display(), None);
    }
}
