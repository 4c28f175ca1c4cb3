use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::key_rotator::KeyRotator;
use crate::metrics::{UPSTREAM_CALLS, outcome};
use crate::models::{RoastResponse, Stock};
use crate::state::AppState;

// Tickers beyond this are dropped
pub const MAX_TICKERS: usize = 10;

/// Normalises tickers to upper case and keeps the ones that look like
/// 1-5 letter symbols, at most [`MAX_TICKERS`] of them.
pub fn validate_tickers(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| (1..=5).contains(&t.len()) && t.chars().all(|c| c.is_ascii_uppercase()))
        .take(MAX_TICKERS)
        .collect()
}

/// Strips a surrounding markdown code fence, with or without a `json` tag.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"));

    match inner {
        Some(inner) => inner.strip_suffix("```").unwrap_or(inner).trim(),
        None => text,
    }
}

fn roast_prompt(tickers: &[String]) -> String {
    format!(
        "Roast this stock portfolio in a humorous, witty and insightful way \
         (200-300 words): {}\n\n\
         Cover composition, risk, diversification and timing. Be brutally honest \
         but entertaining, like a sarcastic financial advisor who still gives real insight.",
        tickers.join(", ")
    )
}

fn analysis_prompt(ticker: &str) -> String {
    format!(
        "Analyze the stock {ticker}. Give the company name, 2-3 short pros and 2-3 short cons \
         (under 25 words each).\n\n\
         Return ONLY valid JSON, no markdown, in this exact format:\n\
         {{\"company\": \"Company Name\", \"pros\": [\"...\"], \"cons\": [\"...\"]}}"
    )
}

// One upstream call on the next key, usage is recorded either way
async fn call_upstream(state: &AppState, prompt: &str) -> Result<String, GatewayError> {
    let (key, index) = state.keys.next();
    let result = state.gemini.generate(prompt, key).await;

    let success = result.is_ok();
    let key_name = KeyRotator::display_name(index);
    state
        .analytics
        .record_credential_usage(index, &key_name, success);
    UPSTREAM_CALLS
        .with_label_values(&[key_name.as_str(), outcome(success)])
        .inc();
    debug!(key = %key_name, success, "upstream call finished");

    result
}

pub async fn portfolio_roast(state: &AppState, tickers: &[String]) -> String {
    match call_upstream(state, &roast_prompt(tickers)).await {
        Ok(roast) => roast,
        Err(e) => {
            warn!(error = %e, "portfolio roast failed, using fallback");
            fallback_roast(tickers.len())
        }
    }
}

pub async fn stock_analysis(state: &AppState, ticker: &str) -> Stock {
    let parsed = call_upstream(state, &analysis_prompt(ticker))
        .await
        .and_then(|text| Ok(serde_json::from_str::<Stock>(extract_json(&text))?));

    match parsed {
        Ok(stock) => stock,
        Err(e) => {
            warn!(ticker, error = %e, "stock analysis failed, using fallback");
            fallback_stock(ticker)
        }
    }
}

/// Builds the full response: one portfolio roast plus one analysis per
/// ticker, all requested concurrently.
pub async fn roast_portfolio(state: Arc<AppState>, tickers: Vec<String>) -> RoastResponse {
    let mut analyses = JoinSet::new();
    for ticker in tickers.iter().cloned() {
        let state = Arc::clone(&state);
        analyses.spawn(async move {
            let stock = stock_analysis(&state, &ticker).await;
            (ticker, stock)
        });
    }

    let roast = portfolio_roast(&state, &tickers).await;

    let mut stocks = BTreeMap::new();
    while let Some(joined) = analyses.join_next().await {
        match joined {
            Ok((ticker, stock)) => {
                stocks.insert(ticker, stock);
            }
            Err(e) => warn!(error = %e, "analysis task failed"),
        }
    }
    for ticker in &tickers {
        stocks
            .entry(ticker.clone())
            .or_insert_with(|| fallback_stock(ticker));
    }

    RoastResponse { roast, stocks }
}

pub fn fallback_roast(ticker_count: usize) -> String {
    format!(
        "Well, well, well... {ticker_count} stocks picked with all the rigor of a dart \
         thrown at a ticker board. This portfolio has the diversification of a chart-topping \
         playlist: heavy on the hits, light on strategy. At least you are consistent about \
         buying high and hoping for the best."
    )
}

pub fn fallback_stock(ticker: &str) -> Stock {
    Stock {
        company: format!("{ticker} Corporation"),
        pros: vec![
            "You managed to spell the ticker correctly".to_string(),
            "It's a real company that exists".to_string(),
            "Could potentially make money".to_string(),
        ],
        cons: vec![
            "Your research was probably a five second search".to_string(),
            "Name recognition isn't a strategy".to_string(),
            "FOMO isn't an investment thesis".to_string(),
        ],
    }
}
