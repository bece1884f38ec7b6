use stock_relay::{config::Config, error::StartupError, router, AppState};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "stock_relay=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    dotenv::dotenv().ok();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env().inspect_err(|err| error!(%err, "invalid configuration"))?;
    if config.provider.api_key.is_none() {
        warn!("ALPHA_VANTAGE_API_KEY is not set; /stock requests will answer 500");
    }

    let app = router(AppState::new(&config)?);

    // listening globally on the configured port
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "backend listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for shutdown signal");
        return std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
