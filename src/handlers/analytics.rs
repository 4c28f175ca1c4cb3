use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::analytics::{AnalyticsSnapshot, CredentialUsage};
use crate::state::AppState;

// Flattened analytics view for the dashboard
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub requests_per_minute: BTreeMap<String, f64>,
    pub total_requests: BTreeMap<String, u64>,
    pub requests_today: BTreeMap<String, u64>,
    pub unique_users: u64,
    pub total_page_visits: u64,
    pub concurrent_users: u64,
    pub highest_concurrent: u64,
    pub gemini_key_metrics: Vec<CredentialUsage>,
    pub system_uptime: f64,
    pub last_update: DateTime<Utc>,
}

impl From<AnalyticsSnapshot> for AnalyticsReport {
    fn from(snapshot: AnalyticsSnapshot) -> Self {
        let total_requests = snapshot
            .api_metrics
            .iter()
            .map(|(endpoint, m)| (endpoint.clone(), m.request_count))
            .collect();
        let requests_today = snapshot
            .api_metrics
            .iter()
            .map(|(endpoint, m)| (endpoint.clone(), m.requests_today))
            .collect();

        Self {
            requests_per_minute: snapshot.requests_per_minute,
            total_requests,
            requests_today,
            unique_users: snapshot.user_metrics.unique_users,
            total_page_visits: snapshot.user_metrics.total_page_visits,
            concurrent_users: snapshot.user_metrics.concurrent_users,
            highest_concurrent: snapshot.user_metrics.highest_concurrent,
            gemini_key_metrics: snapshot.gemini_key_metrics,
            system_uptime: snapshot.system_uptime,
            last_update: snapshot.last_update,
        }
    }
}

pub async fn analytics_handler(State(state): State<Arc<AppState>>) -> Json<AnalyticsReport> {
    Json(state.analytics.snapshot().into())
}
