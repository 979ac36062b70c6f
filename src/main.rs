use anyhow::Context;
use dispatchpi::{AppState, Config, router};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let debug_logging = std::env::args().any(|arg| arg == "--debug");
    let default_filter = if debug_logging {
        "dispatchpi=debug,tower_http=debug"
    } else {
        "dispatchpi=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = Config::load(Config::settings_path())?;
    if config.mail.earth_sender.is_empty() {
        warn!("mail.earth_sender is not set; the earth frame will never match");
    }

    let state = AppState::from_config(&config).await?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    info!(
        bind = %config.server.bind,
        public_url = %config.server.public_url,
        "serving frames"
    );
    axum::serve(listener, router(state))
        .await
        .context("HTTP server failed")?;

    Ok(())
}
