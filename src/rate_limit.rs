use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// Rate limit entry - tracks requests per IP/key
#[derive(Debug, Clone, Copy)]
pub struct ClientWindow {
    pub count: u32,
    pub window_start: Instant, // first allowed request of the current window
    pub last_request: Instant, // last allowed request, drives cleanup
}

/// Fixed-window request budget per client identity.
///
/// The window is anchored at the first request of each window, not at a
/// global clock boundary. Entries idle for two windows are dropped by
/// [`RateLimiter::sweep`].
pub struct RateLimiter {
    clients: DashMap<String, ClientWindow>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    // Number of tracked identities
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Returns `true` when the request from `identity` may proceed.
    pub fn allow(&self, identity: &str) -> bool {
        let now = Instant::now();

        let mut entry = match self.clients.entry(identity.to_string()) {
            // first request from this identity
            Entry::Vacant(vacant) => {
                vacant.insert(ClientWindow {
                    count: 1,
                    window_start: now,
                    last_request: now,
                });
                return true;
            }
            Entry::Occupied(occupied) => occupied.into_ref(),
        };

        // window expired..? start a new one anchored at now
        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 1;
            entry.window_start = now;
            entry.last_request = now;
            return true;
        }

        // under limit.? Allow
        if entry.count < self.limit {
            entry.count += 1;
            entry.last_request = now;
            return true;
        }

        debug!(identity, count = entry.count, "rate limit exceeded");
        false
    }

    /// Requests left in the current window, never negative.
    pub fn remaining_quota(&self, identity: &str) -> u32 {
        match self.clients.get(identity) {
            Some(entry) if Instant::now().duration_since(entry.window_start) < self.window => {
                self.limit.saturating_sub(entry.count)
            }
            _ => self.limit,
        }
    }

    /// Time until the current window of `identity` elapses.
    pub fn remaining_time(&self, identity: &str) -> Duration {
        match self.clients.get(identity) {
            Some(entry) => {
                let elapsed = Instant::now().duration_since(entry.window_start);
                self.window.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    /// Drops identities that have been idle for two windows. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let stale_after = self.window.checked_mul(2).unwrap_or(Duration::MAX);
        let before = self.clients.len();
        self.clients
            .retain(|_, entry| now.duration_since(entry.last_request) < stale_after);
        before.saturating_sub(self.clients.len())
    }

    // Cleanup loop - runs until the token is cancelled
    pub fn spawn_cleanup(
        self: Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            info!(?period, "rate limit cleanup started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = self.len(), "expired rate limit entries");
                        }
                    }
                }
            }

            info!("rate limit cleanup stopped");
        })
    }
}
