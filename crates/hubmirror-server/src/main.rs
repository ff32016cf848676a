use anyhow::Context;
use clap::Parser;
use hubmirror_core::Dispatcher;
use hubmirror_server::{logging, serve, AppState, Cli};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;

    let config = cli.mirror_config();
    let dispatcher = Dispatcher::from_config(&config)
        .await
        .context("failed to initialize mirror")?;

    let listener = TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;

    info!(
        bind = %cli.bind,
        cache_dir = %config.cache_dir.display(),
        upstream = %config.upstream_url,
        authenticated = dispatcher.coordinator().fetcher().is_authenticated(),
        cancel_policy = ?config.cancel_policy,
        "hubmirror listening"
    );

    serve(listener, AppState::new(dispatcher), shutdown_signal()).await?;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
