use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Per-endpoint request counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMetric {
    pub endpoint: String,
    pub request_count: u64,
    pub last_request_time: DateTime<Utc>,
    pub requests_today: u64,
    pub requests_this_hour: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn new(endpoint: &str, now: DateTime<Utc>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            request_count: 0,
            last_request_time: now,
            requests_today: 0,
            requests_this_hour: 0,
            error_count: 0,
        }
    }

    /// Counts one call at `now`. The daily and hourly counters restart at 1
    /// when `now` falls in a different UTC day or hour than the previous call.
    pub fn record(&mut self, success: bool, now: DateTime<Utc>) {
        let previous = self.last_request_time;

        self.request_count += 1;

        if same_day(previous, now) {
            self.requests_today += 1;
        } else {
            self.requests_today = 1;
        }

        if same_hour(previous, now) {
            self.requests_this_hour += 1;
        } else {
            self.requests_this_hour = 1;
        }

        if !success {
            self.error_count += 1;
        }
        self.last_request_time = now;
    }

    pub fn requests_per_minute(&self) -> f64 {
        self.requests_this_hour as f64 / 60.0
    }
}

// Usage of one upstream API key slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialUsage {
    pub key_index: usize,
    pub key_name: String,
    pub request_count: u64,
    pub error_count: u64,
    pub last_used: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorMetrics {
    pub unique_users: u64,
    pub total_page_visits: u64,
    pub concurrent_users: u64,
    pub highest_concurrent: u64,
    pub last_update: DateTime<Utc>,
}

impl Default for VisitorMetrics {
    fn default() -> Self {
        Self {
            unique_users: 0,
            total_page_visits: 0,
            concurrent_users: 0,
            highest_concurrent: 0,
            last_update: Utc::now(),
        }
    }
}

/// The persisted analytics document.
///
/// Field names match the JSON written to the analytics file, so files written
/// by earlier deployments load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsData {
    #[serde(default)]
    pub api_metrics: BTreeMap<String, EndpointMetric>,
    #[serde(default)]
    pub user_metrics: VisitorMetrics,
    #[serde(default)]
    pub gemini_key_metrics: Vec<CredentialUsage>,
    pub last_update: DateTime<Utc>,
}

impl Default for AnalyticsData {
    fn default() -> Self {
        Self {
            api_metrics: BTreeMap::new(),
            user_metrics: VisitorMetrics::default(),
            gemini_key_metrics: Vec::new(),
            last_update: Utc::now(),
        }
    }
}

impl AnalyticsData {
    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.api_metrics.is_empty()
            && self.gemini_key_metrics.is_empty()
            && self.user_metrics.total_page_visits == 0
            && self.user_metrics.unique_users == 0
    }
}

// Read-only view served by the analytics endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub api_metrics: BTreeMap<String, EndpointMetric>,
    pub user_metrics: VisitorMetrics,
    pub gemini_key_metrics: Vec<CredentialUsage>,
    pub requests_per_minute: BTreeMap<String, f64>,
    pub system_uptime: f64, // seconds
    pub last_update: DateTime<Utc>,
}

fn same_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive()
}

fn same_hour(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    same_day(a, b) && a.hour() == b.hour()
}
