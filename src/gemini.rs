use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::GatewayError;
use crate::metrics::UPSTREAM_LATENCY;
use crate::models::{GeminiRequest, GeminiResponse};

// Thin client for the Gemini generateContent endpoint
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Sends `prompt` with `api_key` and returns the first candidate's text.
    pub async fn generate(&self, prompt: &str, api_key: &str) -> Result<String, GatewayError> {
        let url = reqwest::Url::parse_with_params(&self.endpoint(), &[("key", api_key)])
            .map_err(|e| GatewayError::Internal(format!("invalid Gemini URL: {e}")))?;
        let start_time = Instant::now();

        let res = self
            .client
            .post(url)
            .json(&GeminiRequest::from_prompt(prompt))
            .send()
            .await;
        UPSTREAM_LATENCY.observe(start_time.elapsed().as_secs_f64());
        let res = res?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body: GeminiResponse = res.json().await?;
        debug!(candidates = body.candidates.len(), "Gemini responded");
        body.first_text().ok_or(GatewayError::EmptyCompletion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::Query, http::StatusCode, routing::post};
    use std::collections::HashMap;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn returns_first_candidate_text() {
        let app = Router::new().route(
            "/v1beta/models/{model}",
            post(
                |Query(q): Query<HashMap<String, String>>, Json(req): Json<GeminiRequest>| async move {
                    assert_eq!(q.get("key").map(String::as_str), Some("secret"));
                    let echoed = req.contents[0].parts[0].text.clone();
                    Json(serde_json::json!({
                        "candidates": [{"content": {"parts": [{"text": format!("re: {echoed}")}]}}]
                    }))
                },
            ),
        );
        let base = serve(app).await;

        let client = GeminiClient::new(&base, "test-model", Duration::from_secs(5)).unwrap();
        let text = client.generate("hello", "secret").await.unwrap();
        assert_eq!(text, "re: hello");
    }

    #[tokio::test]
    async fn non_success_status_is_an_upstream_error() {
        let app = Router::new().route(
            "/v1beta/models/{model}",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "quota exhausted") }),
        );
        let base = serve(app).await;

        let client = GeminiClient::new(&base, "m", Duration::from_secs(5)).unwrap();
        match client.generate("x", "k").await {
            Err(GatewayError::Upstream { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "quota exhausted");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_candidates_are_rejected() {
        let app = Router::new().route(
            "/v1beta/models/{model}",
            post(|| async { Json(serde_json::json!({ "candidates": [] })) }),
        );
        let base = serve(app).await;

        let client = GeminiClient::new(&base, "m", Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.generate("x", "k").await,
            Err(GatewayError::EmptyCompletion)
        ));
    }
}
