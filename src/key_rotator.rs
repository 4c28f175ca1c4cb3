use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::error::GatewayError;

// Highest numbered GEMINI_API_KEY_<n> variable that is looked up
const MAX_KEY_SLOTS: usize = 5;

// Round-robin rotation over interchangeable Gemini API keys
pub struct KeyRotator {
    keys: Vec<String>,
    current: AtomicUsize,
}

impl KeyRotator {
    pub fn new(keys: Vec<String>) -> Result<Self, GatewayError> {
        if keys.is_empty() {
            return Err(GatewayError::NoCredentials);
        }

        info!(count = keys.len(), "loaded API keys for load balancing");

        Ok(Self {
            keys,
            current: AtomicUsize::new(0),
        })
    }

    /// Resolves keys through `lookup` (normally the process environment).
    ///
    /// `GEMINI_API_KEY` is honoured for the first slot so single-key setups keep
    /// working; otherwise `GEMINI_API_KEY_1` through `GEMINI_API_KEY_5` are read
    /// in order. Blank values are skipped.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut keys = Vec::new();
        for slot in 1..=MAX_KEY_SLOTS {
            if slot == 1 {
                if let Some(key) = present("GEMINI_API_KEY") {
                    keys.push(key);
                    continue;
                }
            }
            if let Some(key) = present(&format!("GEMINI_API_KEY_{slot}")) {
                keys.push(key);
            }
        }

        if keys.is_empty() {
            warn!("no API keys found, set GEMINI_API_KEY_1 through GEMINI_API_KEY_{MAX_KEY_SLOTS}");
        }
        Self::new(keys)
    }

    /// Next key and its pool index. The cursor is advanced atomically so
    /// concurrent callers never share a pre-advance index.
    pub fn next(&self) -> (&str, usize) {
        let len = self.keys.len();
        let index = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);
        (&self.keys[index], index)
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    // Name reported in analytics, never the key itself
    pub fn display_name(index: usize) -> String {
        format!("GEMINI_API_KEY_{}", index + 1)
    }
}
