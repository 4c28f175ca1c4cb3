use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use roast_gateway::config::Args;
use roast_gateway::key_rotator::KeyRotator;
use roast_gateway::router;
use roast_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let dotenv = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("roast_gateway=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    if dotenv.is_err() {
        warn!(".env file not found");
    }

    let args = Args::parse();

    // no keys, no service
    let keys = KeyRotator::from_lookup(|name| std::env::var(name).ok())?;
    let key_count = keys.count();

    let state = Arc::new(AppState::from_args(&args, keys).await?);
    let cancel = CancellationToken::new();
    let tasks = state.start(&cancel);

    let app = router(state.clone());

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(port = args.port, keys = key_count, "server starting");
    info!(
        limit = args.rate_limit,
        window_secs = args.rate_window,
        "rate limit per client"
    );
    info!(path = %args.analytics_file.display(), "analytics file");

    let shutdown = cancel.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
            _ = shutdown.cancelled() => {}
        }
    })
    .await?;

    // stop sweepers and let the writer persist the final snapshot
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }

    info!("server stopped");
    Ok(())
}
