use axum::{
    Json,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::metrics::{RATE_LIMITED_TOTAL, REQUEST_TOTAL, outcome};
use crate::state::AppState;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// Resolves the client address: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the peer socket address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn peer_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

// Whole seconds, rounded up so a client waiting this long is let through
fn ceil_secs(d: Duration) -> u64 {
    d.as_secs().saturating_add(u64::from(d.subsec_nanos() > 0))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// Unix timestamp at which `remaining` has elapsed
fn reset_at(remaining: Duration) -> u64 {
    unix_now().saturating_add(ceil_secs(remaining))
}

fn set_rate_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset_at: u64) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(reset_at));
}

/// Rejects clients over their budget with 429 and annotates allowed
/// responses with the remaining budget.
pub async fn rate_limit(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let ip = client_ip(req.headers(), peer_addr(&req));
    let limiter = &state.rate_limiter;

    if !limiter.allow(&ip) {
        let remaining_time = limiter.remaining_time(&ip);
        let retry_after = ceil_secs(remaining_time);
        RATE_LIMITED_TOTAL.inc();
        info!(client = %ip, retry_after, "rate limit exceeded");

        let mut res = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Rate limit exceeded. Please wait before making another request.",
                "retryAfter": retry_after,
                "message": format!("You can make another request in {retry_after}s"),
            })),
        )
            .into_response();
        set_rate_headers(res.headers_mut(), limiter.limit(), 0, reset_at(remaining_time));
        return res;
    }

    let remaining = limiter.remaining_quota(&ip);
    let reset_at = reset_at(limiter.remaining_time(&ip));

    let mut res = next.run(req).await;
    set_rate_headers(res.headers_mut(), limiter.limit(), remaining, reset_at);
    res
}

/// Records the visit, the session and the endpoint outcome around a handler.
pub async fn track_request(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let peer = peer_addr(&req);
    let ip = client_ip(req.headers(), peer);
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().trim_start_matches('/').to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let session_id = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            match peer {
                Some(addr) => format!("{addr}-{nanos}"),
                None => format!("{ip}-{nanos}"),
            }
        });

    let analytics = &state.analytics;
    analytics.track_connection_start(&session_id);
    analytics.record_visit(&ip);

    let res = next.run(req).await;

    analytics.track_connection_end(&session_id);
    let success = res.status().as_u16() < 400;
    analytics.record_endpoint_call(&endpoint, success);
    REQUEST_TOTAL
        .with_label_values(&[endpoint.as_str(), outcome(success)])
        .inc();

    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn forwarded_for_wins() {
        let h = headers(&[
            ("x-forwarded-for", " 203.0.113.7 , 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&h, None), "203.0.113.7");
    }

    #[test]
    fn real_ip_then_peer_address() {
        let peer: SocketAddr = "192.0.2.9:4431".parse().unwrap();
        assert_eq!(client_ip(&headers(&[("x-real-ip", "198.51.100.2")]), Some(peer)), "198.51.100.2");
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "192.0.2.9");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn retry_seconds_round_up() {
        assert_eq!(ceil_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }

    #[test]
    fn huge_windows_saturate() {
        assert_eq!(ceil_secs(Duration::MAX), u64::MAX);
        assert_eq!(reset_at(Duration::MAX), u64::MAX);
        assert!(reset_at(Duration::from_secs(60)) >= unix_now() + 60);
    }
}
