use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grader_hooks::config::Config;
use grader_hooks::dispatch::Dispatcher;
use grader_hooks::github::OctocrabScm;
use grader_hooks::handlers::EventRouter;
use grader_hooks::runner::CommandRunner;
use grader_hooks::server::{AppState, build_router, shutdown_on};
use grader_hooks::store::MemoryStore;
use grader_hooks::stream::StreamServices;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grader_hooks=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let token = config
        .github_token
        .clone()
        .context("GRADER_GITHUB_TOKEN must be set")?;
    let scm = OctocrabScm::from_token(token).context("failed to build GitHub client")?;

    let store = match &config.seed_file {
        Some(path) => MemoryStore::from_seed_file(path)
            .with_context(|| format!("failed to load seed file {}", path.display()))?,
        None => MemoryStore::new(),
    };

    let (program, args) = config
        .runner_command
        .split_first()
        .context("GRADER_RUNNER_COMMAND is empty")?;
    let runner = CommandRunner::new(program).with_args(args.iter().cloned());

    let streams = StreamServices::new();
    let router = EventRouter::new(
        Arc::new(store),
        Arc::new(scm),
        Arc::new(runner),
        streams.clone(),
        config.handler_config(),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(router),
        config.max_concurrent_jobs,
    ));

    let app = build_router(AppState::new(
        config.webhook_secret.clone(),
        Arc::clone(&dispatcher),
        streams.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(
        addr = %config.listen_addr,
        max_concurrent = config.max_concurrent_jobs,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_on(shutdown_signal(), streams))
        .await?;

    info!("draining in-flight events");
    dispatcher.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
