use crate::error::GatewayError;
use crate::metrics::render;

// Prometheus text exposition
pub async fn metrics_handler() -> Result<String, GatewayError> {
    render().map_err(|e| GatewayError::Internal(format!("failed to encode metrics: {e}")))
}
