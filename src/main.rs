use anyhow::Context;

use toolchat::config;
use toolchat::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("cannot resolve working directory")?;
    let (config, config_path) = config::load_or_default(&cwd).context("failed to load configuration")?;

    toolchat::init_tracing(&config.logging).context("failed to initialize logging")?;
    match &config_path {
        Some(path) => tracing::info!(path = %path.display(), "configuration loaded"),
        None => tracing::warn!("no {} found, using defaults", config::CONFIG_FILE_NAME),
    }

    let state = AppState::from_config(&config).context("failed to build chat client")?;
    let app = server::router(state, &config.server);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!(
        bind = %config.server.bind,
        model = %config.llm.model,
        "toolchat listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("toolchat stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
