use axum::{Json, extract::State, extract::rejection::JsonRejection};
use std::sync::Arc;
use tracing::info;

use crate::error::GatewayError;
use crate::models::{RoastRequest, RoastResponse};
use crate::roast::{roast_portfolio, validate_tickers};
use crate::state::AppState;

pub async fn roast_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RoastRequest>, JsonRejection>,
) -> Result<Json<RoastResponse>, GatewayError> {
    let Json(payload) = payload.map_err(|_| GatewayError::InvalidRequest("Invalid JSON".into()))?;

    let tickers = validate_tickers(&payload.tickers);
    if tickers.is_empty() {
        return Err(GatewayError::InvalidRequest("No valid tickers provided".into()));
    }

    info!(tickers = ?tickers, "roasting portfolio");
    Ok(Json(roast_portfolio(state, tickers).await))
}
