use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::analytics::{AnalyticsManager, store::PersistRequest};
use crate::config::Args;
use crate::error::GatewayError;
use crate::gemini::GeminiClient;
use crate::key_rotator::KeyRotator;
use crate::rate_limit::RateLimiter;

// How often the rate limiter drops idle clients
pub const RATE_LIMIT_SWEEP: Duration = Duration::from_secs(5 * 60);
// How often idle sessions are expired
pub const SESSION_SWEEP: Duration = Duration::from_secs(60);

// app's shared state, built once in main and handed to every handler
pub struct AppState {
    pub gemini: GeminiClient,
    pub keys: KeyRotator,
    pub rate_limiter: Arc<RateLimiter>,
    pub analytics: Arc<AnalyticsManager>,
    persist_rx: std::sync::Mutex<Option<mpsc::Receiver<PersistRequest>>>,
}

impl AppState {
    pub fn new(
        gemini: GeminiClient,
        keys: KeyRotator,
        rate_limiter: RateLimiter,
        analytics: AnalyticsManager,
        persist_rx: mpsc::Receiver<PersistRequest>,
    ) -> Self {
        Self {
            gemini,
            keys,
            rate_limiter: Arc::new(rate_limiter),
            analytics: Arc::new(analytics),
            persist_rx: std::sync::Mutex::new(Some(persist_rx)),
        }
    }

    /// Composition root: wires every component from the parsed arguments.
    pub async fn from_args(args: &Args, keys: KeyRotator) -> Result<Self, GatewayError> {
        let gemini = GeminiClient::new(
            &args.gemini_base_url,
            &args.gemini_model,
            Duration::from_secs(args.upstream_timeout),
        )?;
        let rate_limiter =
            RateLimiter::new(args.rate_limit, Duration::from_secs(args.rate_window));

        // one pending signal is enough, the writer always saves the latest state
        let (persist_tx, persist_rx) = mpsc::channel::<PersistRequest>(1);
        let analytics = AnalyticsManager::load(&args.analytics_file, persist_tx).await;

        Ok(Self::new(gemini, keys, rate_limiter, analytics, persist_rx))
    }

    /// Spawns the background tasks: rate limit cleanup, session expiry and
    /// the analytics writer. All of them stop when `cancel` fires. Calling
    /// this twice does not start a second writer.
    pub fn start(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![
            self.rate_limiter
                .clone()
                .spawn_cleanup(RATE_LIMIT_SWEEP, cancel.clone()),
            self.analytics
                .clone()
                .spawn_connection_sweeper(SESSION_SWEEP, cancel.clone()),
        ];

        let persist_rx = self
            .persist_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(rx) = persist_rx {
            tasks.push(self.analytics.clone().spawn_writer(rx, cancel.clone()));
        }

        tasks
    }
}
