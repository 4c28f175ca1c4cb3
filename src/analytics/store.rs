//! Best-effort persistence of the analytics document.
//!
//! Mutations only signal that the document is dirty. A single writer task
//! owns the file, so concurrent mutations coalesce into one write and can
//! never interleave partial output.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::AnalyticsManager;
use super::model::AnalyticsData;

// Message for the writer - a dirty signal or a flush with acknowledgement
pub enum PersistRequest {
    Dirty,
    Flush(oneshot::Sender<()>),
}

/// Loads the analytics document, falling back to the default state.
///
/// A missing file is the normal first-run case. Unreadable or corrupt files
/// are logged and discarded as a whole.
pub async fn load(path: &Path) -> AnalyticsData {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no analytics file, starting empty");
            return AnalyticsData::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read analytics file");
            return AnalyticsData::default();
        }
    };

    match serde_json::from_slice::<AnalyticsData>(&bytes) {
        Ok(data) => {
            info!(
                path = %path.display(),
                endpoints = data.api_metrics.len(),
                keys = data.gemini_key_metrics.len(),
                "loaded analytics"
            );
            data
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "discarding corrupt analytics file");
            AnalyticsData::default()
        }
    }
}

/// Writes `data` to `path` through a sibling temp file and a rename.
pub async fn save(path: &Path, data: &AnalyticsData) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(data)?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// The single writer - persists the current document whenever signalled.
///
/// Runs until cancelled or until every sender is gone, then writes one final
/// snapshot so the file reflects the last in-memory state.
pub async fn snapshot_writer(
    mut rx: mpsc::Receiver<PersistRequest>,
    source: Arc<AnalyticsManager>,
    cancel: CancellationToken,
) {
    let path = source.data_file().to_path_buf();
    info!(path = %path.display(), "analytics writer started");

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let mut waiters = Vec::new();
        if let PersistRequest::Flush(done) = request {
            waiters.push(done);
        }
        // coalesce whatever queued up meanwhile
        while let Ok(request) = rx.try_recv() {
            if let PersistRequest::Flush(done) = request {
                waiters.push(done);
            }
        }

        write_snapshot(&path, &source).await;
        for done in waiters {
            let _ = done.send(());
        }
    }

    rx.close();
    source.writer_stopped();
    let mut waiters = Vec::new();
    while let Ok(request) = rx.try_recv() {
        if let PersistRequest::Flush(done) = request {
            waiters.push(done);
        }
    }
    write_snapshot(&path, &source).await;
    for done in waiters {
        let _ = done.send(());
    }

    info!("analytics writer stopped");
}

async fn write_snapshot(path: &Path, source: &AnalyticsManager) {
    let data = source.document();
    match save(path, &data).await {
        Ok(()) => debug!(path = %path.display(), "analytics saved"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to save analytics"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn missing_file_yields_default_state() {
        let dir = tempfile::tempdir().unwrap();
        let data = load(&dir.path().join("absent.json")).await;
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.json");
        tokio::fs::write(&path, b"{\"apiMetrics\": {\"roast\": 42").await.unwrap();

        let data = load(&path).await;
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn save_creates_parent_directory_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("analytics.json");

        let mut data = AnalyticsData::default();
        data.user_metrics.total_page_visits = 9;
        data.user_metrics.unique_users = 4;
        save(&path, &data).await.unwrap();

        let loaded = load(&path).await;
        assert_eq!(loaded, data);
        assert!(!temp_path(&path).exists());

        // re-saving what was loaded produces the same document
        save(&path, &loaded).await.unwrap();
        let first: serde_json::Value = serde_json::to_value(&data).unwrap();
        let second: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn write_failures_do_not_stop_the_writer() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, b"not a directory").await.unwrap();
        let path = blocker.join("analytics.json");

        let (tx, rx) = mpsc::channel(1);
        let analytics = Arc::new(AnalyticsManager::new(AnalyticsData::default(), &path, tx));
        let cancel = CancellationToken::new();
        let writer = analytics.clone().spawn_writer(rx, cancel.clone());

        analytics.record_visit("10.0.0.1");
        let flushed = tokio::time::timeout(Duration::from_secs(2), analytics.flush()).await;
        assert!(flushed.is_ok());
        assert!(!writer.is_finished());

        analytics.record_visit("10.0.0.2");
        let flushed = tokio::time::timeout(Duration::from_secs(2), analytics.flush()).await;
        assert!(flushed.is_ok());
        assert!(!writer.is_finished());
        assert_eq!(analytics.snapshot().user_metrics.total_page_visits, 2);
        assert!(!path.exists());

        cancel.cancel();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn loads_document_written_by_earlier_deployment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.json");
        let raw = r#"{
          "apiMetrics": {
            "health": {
              "endpoint": "health",
              "requestCount": 3,
              "lastRequestTime": "2025-06-01T12:00:00.5Z",
              "requestsToday": 3,
              "requestsThisHour": 1,
              "errorCount": 0
            }
          },
          "userMetrics": {
            "uniqueUsers": 1,
            "totalPageVisits": 3,
            "concurrentUsers": 0,
            "highestConcurrent": 2,
            "lastUpdate": "0001-01-01T00:00:00Z"
          },
          "geminiKeyMetrics": [],
          "lastUpdate": "2025-06-01T12:00:00Z"
        }"#;
        tokio::fs::write(&path, raw).await.unwrap();

        let data = load(&path).await;
        assert_eq!(data.api_metrics["health"].request_count, 3);
        assert_eq!(data.user_metrics.highest_concurrent, 2);
        assert!(data.gemini_key_metrics.is_empty());
    }
}
