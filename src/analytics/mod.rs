mod model;
pub mod store;

pub use model::{AnalyticsData, AnalyticsSnapshot, CredentialUsage, EndpointMetric, VisitorMetrics};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::ACTIVE_SESSIONS;
use store::PersistRequest;

/// Sessions not seen for this long are considered gone.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

struct Inner {
    data: AnalyticsData,
    // process lifetime only, never persisted
    seen_visitors: HashSet<String>,
}

/// Aggregates endpoint, key and visitor metrics for the whole process.
///
/// All counters live behind one lock. Every mutation signals the snapshot
/// writer (see [`store::snapshot_writer`]) without waiting for the write.
pub struct AnalyticsManager {
    inner: RwLock<Inner>,
    active_connections: DashMap<String, Instant>,
    data_file: PathBuf,
    start_time: Instant,
    persist_tx: mpsc::Sender<PersistRequest>,
    writer_running: AtomicBool,
}

impl AnalyticsManager {
    pub fn new(
        data: AnalyticsData,
        data_file: impl Into<PathBuf>,
        persist_tx: mpsc::Sender<PersistRequest>,
    ) -> Self {
        let mut data = data;
        // the session set starts empty, whatever the snapshot says
        data.user_metrics.concurrent_users = 0;
        ACTIVE_SESSIONS.set(0);

        Self {
            inner: RwLock::new(Inner {
                data,
                seen_visitors: HashSet::new(),
            }),
            active_connections: DashMap::new(),
            data_file: data_file.into(),
            start_time: Instant::now(),
            persist_tx,
            writer_running: AtomicBool::new(false),
        }
    }

    /// Seeds the manager from `data_file` if it holds a readable snapshot.
    pub async fn load(
        data_file: impl Into<PathBuf>,
        persist_tx: mpsc::Sender<PersistRequest>,
    ) -> Self {
        let data_file = data_file.into();
        let data = store::load(&data_file).await;
        Self::new(data, data_file, persist_tx)
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // signal the writer
    fn mark_dirty(&self) {
        let _ = self.persist_tx.try_send(PersistRequest::Dirty);
    }

    pub fn record_endpoint_call(&self, endpoint: &str, success: bool) {
        self.record_endpoint_call_at(endpoint, success, Utc::now());
    }

    pub(crate) fn record_endpoint_call_at(&self, endpoint: &str, success: bool, now: DateTime<Utc>) {
        {
            let mut inner = self.write();
            inner
                .data
                .api_metrics
                .entry(endpoint.to_string())
                .or_insert_with(|| EndpointMetric::new(endpoint, now))
                .record(success, now);
            inner.data.last_update = now;
        }
        self.mark_dirty();
    }

    pub fn record_credential_usage(&self, index: usize, display_name: &str, success: bool) {
        let now = Utc::now();
        {
            let mut inner = self.write();
            let keys = &mut inner.data.gemini_key_metrics;

            let position = match keys.iter().position(|k| k.key_index == index) {
                Some(position) => position,
                None => {
                    keys.push(CredentialUsage {
                        key_index: index,
                        key_name: display_name.to_string(),
                        request_count: 0,
                        error_count: 0,
                        last_used: now,
                        is_active: true,
                    });
                    keys.len() - 1
                }
            };

            let usage = &mut keys[position];
            usage.request_count += 1;
            usage.last_used = now;
            if !success {
                usage.error_count += 1;
            }
        }
        self.mark_dirty();
    }

    pub fn record_visit(&self, client_identity: &str) {
        {
            let mut inner = self.write();
            inner.data.user_metrics.total_page_visits += 1;
            if inner.seen_visitors.insert(client_identity.to_string()) {
                inner.data.user_metrics.unique_users += 1;
            }
            inner.data.user_metrics.last_update = Utc::now();
        }
        self.mark_dirty();
    }

    pub fn track_connection_start(&self, session_id: &str) {
        self.active_connections
            .insert(session_id.to_string(), Instant::now());
        self.update_concurrent_users();
    }

    pub fn track_connection_end(&self, session_id: &str) {
        self.active_connections.remove(session_id);
        self.update_concurrent_users();
    }

    /// Drops sessions that ended without [`track_connection_end`](Self::track_connection_end).
    pub fn expire_stale_connections(&self) -> usize {
        let now = Instant::now();
        let before = self.active_connections.len();
        self.active_connections
            .retain(|_, last_seen| now.duration_since(*last_seen) <= SESSION_TIMEOUT);
        let removed = before.saturating_sub(self.active_connections.len());
        self.update_concurrent_users();
        removed
    }

    fn update_concurrent_users(&self) {
        {
            let mut inner = self.write();
            let count = self.active_connections.len() as u64;
            let users = &mut inner.data.user_metrics;
            users.concurrent_users = count;
            users.highest_concurrent = users.highest_concurrent.max(count);
            users.last_update = Utc::now();
            ACTIVE_SESSIONS.set(count as i64);
        }
        self.mark_dirty();
    }

    /// Consistent copy of the aggregate plus derived values.
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let inner = self.read();
        let data = &inner.data;

        let requests_per_minute = data
            .api_metrics
            .iter()
            .map(|(endpoint, metric)| (endpoint.clone(), metric.requests_per_minute()))
            .collect();

        AnalyticsSnapshot {
            api_metrics: data.api_metrics.clone(),
            user_metrics: data.user_metrics.clone(),
            gemini_key_metrics: data.gemini_key_metrics.clone(),
            requests_per_minute,
            system_uptime: self.start_time.elapsed().as_secs_f64(),
            last_update: data.last_update,
        }
    }

    // The persisted document as it stands right now
    pub fn document(&self) -> AnalyticsData {
        self.read().data.clone()
    }

    /// Waits until the writer has processed the current state. Returns
    /// immediately when no writer is running. The writer acknowledges even
    /// when the save failed; failures only show up in the log.
    pub async fn flush(&self) {
        if !self.writer_running.load(Ordering::Acquire) {
            return;
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self.persist_tx.send(PersistRequest::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Starts the single snapshot writer on `rx`.
    pub fn spawn_writer(
        self: Arc<Self>,
        rx: mpsc::Receiver<PersistRequest>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        self.writer_running.store(true, Ordering::Release);
        tokio::spawn(store::snapshot_writer(rx, self, cancel))
    }

    pub(super) fn writer_stopped(&self) {
        self.writer_running.store(false, Ordering::Release);
    }

    // Sweeper loop for sessions that never sent an end
    pub fn spawn_connection_sweeper(
        self: Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;
            info!(?period, "connection sweeper started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.expire_stale_connections();
                        if removed > 0 {
                            debug!(removed, "expired idle sessions");
                        }
                    }
                }
            }

            info!("connection sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::time::advance;

    fn detached() -> AnalyticsManager {
        let (tx, _rx) = mpsc::channel(1);
        AnalyticsManager::new(AnalyticsData::default(), "unused.json", tx)
    }

    #[tokio::test]
    async fn counts_successes_and_failures_per_endpoint() {
        let analytics = detached();
        let now = Utc.with_ymd_and_hms(2025, 5, 5, 8, 0, 0).unwrap();
        for _ in 0..4 {
            analytics.record_endpoint_call_at("roast", true, now);
        }
        for _ in 0..2 {
            analytics.record_endpoint_call_at("roast", false, now);
        }
        analytics.record_endpoint_call_at("health", true, now);

        let snapshot = analytics.snapshot();
        let roast = &snapshot.api_metrics["roast"];
        assert_eq!(roast.request_count, 6);
        assert_eq!(roast.error_count, 2);
        assert_eq!(roast.requests_this_hour, 6);
        assert_eq!(snapshot.requests_per_minute["roast"], 6.0 / 60.0);
        assert_eq!(snapshot.api_metrics["health"].request_count, 1);
        assert_eq!(snapshot.last_update, now);
    }

    #[tokio::test]
    async fn calls_on_different_days_reset_daily_count() {
        let analytics = detached();
        let monday = Utc.with_ymd_and_hms(2025, 5, 5, 12, 0, 0).unwrap();
        let tuesday = Utc.with_ymd_and_hms(2025, 5, 6, 12, 0, 0).unwrap();

        analytics.record_endpoint_call_at("roast", true, monday);
        analytics.record_endpoint_call_at("roast", true, monday);
        analytics.record_endpoint_call_at("roast", true, tuesday);

        let metric = &analytics.snapshot().api_metrics["roast"];
        assert_eq!(metric.requests_today, 1);
        assert_eq!(metric.request_count, 3);
    }

    #[tokio::test]
    async fn credential_usage_is_tracked_per_index() {
        let analytics = detached();
        analytics.record_credential_usage(0, "GEMINI_API_KEY_1", true);
        analytics.record_credential_usage(1, "GEMINI_API_KEY_2", false);
        analytics.record_credential_usage(0, "GEMINI_API_KEY_1", false);

        let keys = analytics.snapshot().gemini_key_metrics;
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].key_index, 0);
        assert_eq!(keys[0].request_count, 2);
        assert_eq!(keys[0].error_count, 1);
        assert_eq!(keys[1].key_name, "GEMINI_API_KEY_2");
        assert_eq!(keys[1].error_count, 1);
        assert!(keys.iter().all(|k| k.is_active));
    }

    #[tokio::test]
    async fn unique_visitors_are_counted_once() {
        let analytics = detached();
        for ip in ["A", "A", "B", "A", "C"] {
            analytics.record_visit(ip);
        }

        let users = analytics.snapshot().user_metrics;
        assert_eq!(users.unique_users, 3);
        assert_eq!(users.total_page_visits, 5);
    }

    #[tokio::test]
    async fn concurrent_sessions_and_high_water_mark() {
        let analytics = detached();
        analytics.track_connection_start("S1");
        analytics.track_connection_start("S2");
        analytics.track_connection_end("S1");

        let users = analytics.snapshot().user_metrics;
        assert_eq!(users.concurrent_users, 1);
        assert_eq!(users.highest_concurrent, 2);

        analytics.track_connection_end("S2");
        analytics.track_connection_end("unknown");
        let users = analytics.snapshot().user_metrics;
        assert_eq!(users.concurrent_users, 0);
        assert_eq!(users.highest_concurrent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_expire() {
        let analytics = detached();
        analytics.track_connection_start("stale");
        advance(Duration::from_secs(4 * 60)).await;
        analytics.track_connection_start("fresh");
        advance(Duration::from_secs(2 * 60)).await;

        assert_eq!(analytics.expire_stale_connections(), 1);
        assert_eq!(analytics.snapshot().user_metrics.concurrent_users, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_expires_sessions_until_cancelled() {
        let analytics = Arc::new(detached());
        analytics.track_connection_start("gone");

        let cancel = CancellationToken::new();
        let handle = analytics
            .clone()
            .spawn_connection_sweeper(Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(6 * 60 + 1)).await;
        assert_eq!(analytics.snapshot().user_metrics.concurrent_users, 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn flush_returns_when_writer_never_started() {
        // receiver alive but nothing draining it
        let (tx, _rx) = mpsc::channel(1);
        let analytics = AnalyticsManager::new(AnalyticsData::default(), "unused.json", tx);
        analytics.record_visit("a");
        analytics.record_visit("b");

        let flushed = tokio::time::timeout(Duration::from_secs(2), analytics.flush()).await;
        assert!(flushed.is_ok());
    }

    #[tokio::test]
    async fn loaded_snapshot_starts_with_no_active_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.json");
        let mut data = AnalyticsData::default();
        data.user_metrics.concurrent_users = 5;
        data.user_metrics.highest_concurrent = 7;
        store::save(&path, &data).await.unwrap();

        let (tx, _rx) = mpsc::channel(1);
        let analytics = AnalyticsManager::load(&path, tx).await;
        let users = analytics.snapshot().user_metrics;
        assert_eq!(users.concurrent_users, 0);
        assert_eq!(users.highest_concurrent, 7);
    }

    #[tokio::test]
    async fn snapshot_survives_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("analytics.json");

        let (tx, rx) = mpsc::channel(1);
        let analytics = Arc::new(AnalyticsManager::load(&path, tx).await);
        let cancel = CancellationToken::new();
        let writer = analytics.clone().spawn_writer(rx, cancel.clone());

        analytics.record_endpoint_call("roast", true);
        analytics.record_endpoint_call("roast", false);
        analytics.record_credential_usage(2, "GEMINI_API_KEY_3", true);
        analytics.record_visit("10.1.1.1");
        analytics.record_visit("10.1.1.2");
        analytics.flush().await;

        let before = analytics.snapshot();
        cancel.cancel();
        writer.await.unwrap();

        let (tx, _rx) = mpsc::channel(1);
        let reloaded = AnalyticsManager::load(&path, tx).await.snapshot();
        assert_eq!(reloaded.api_metrics, before.api_metrics);
        assert_eq!(reloaded.gemini_key_metrics, before.gemini_key_metrics);
        assert_eq!(reloaded.user_metrics, before.user_metrics);
        assert_eq!(reloaded.last_update, before.last_update);
    }

    #[tokio::test]
    async fn concurrent_writers_leave_a_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.json");

        let (tx, rx) = mpsc::channel(1);
        let analytics = Arc::new(AnalyticsManager::load(&path, tx).await);
        let cancel = CancellationToken::new();
        let writer = analytics.clone().spawn_writer(rx, cancel.clone());

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let analytics = analytics.clone();
                tokio::spawn(async move {
                    analytics.record_visit(&format!("client-{}", i % 8));
                    analytics.record_endpoint_call("roast", i % 5 != 0);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        analytics.flush().await;

        let saved = store::load(&path).await;
        assert_eq!(saved.user_metrics.total_page_visits, 32);
        assert_eq!(saved.user_metrics.unique_users, 8);
        assert_eq!(saved.api_metrics["roast"].request_count, 32);
        assert_eq!(saved.api_metrics["roast"].error_count, 7);

        cancel.cancel();
        writer.await.unwrap();
    }
}
