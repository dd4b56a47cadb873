//! `zoomwebhookd` — ingestion daemon. Parses CLI flags, loads config, reads
//! the HMAC secret from the environment, assembles the pipeline via
//! `zoom_ingest_runtime::build`, and serves it until SIGINT/SIGTERM, at which
//! point it drains in-flight batches before exiting.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use zoom_ingest_runtime::config::ENV_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(name = "zoomwebhookd", about = "Signed Zoom webhook ingestion daemon")]
struct Cli {
    /// Path to the TOML config file. Overrides ZOOM_INGEST_CONFIG.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        std::env::set_var(ENV_CONFIG_PATH, path);
    }

    if let Err(e) = run(cli).await {
        log::error!("fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(_cli: Cli) -> anyhow::Result<()> {
    let watcher = zoom_ingest_runtime::load_config_watcher().context("loading config")?;
    let cfg = watcher.current();

    let secret = zoom_ingest_runtime::load_secret(&cfg).context("reading webhook secret")?;

    let addr: SocketAddr = cfg.listen.parse().with_context(|| format!("invalid listen address {:?}", cfg.listen))?;

    let state = zoom_ingest_runtime::build(cfg, secret).await.context("assembling pipeline")?;
    let shard_count = state.pipeline.shard_count();
    log::info!("listening on {addr} with {shard_count} shard(s)");

    let reloader = zoom_ingest_runtime::spawn_sink_reloader(state.clone(), watcher.clone());
    drop(watcher);

    let routes = zoom_ingest_runtime::ingress::routes(state.clone());

    let (_, serve) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        shutdown_signal().await;
        log::info!("shutdown signal received, draining in-flight batches");
    });

    serve.await;

    // The reloader task holds its own clone of `state`; it exits once the
    // last `ConfigWatcher` (dropped above) tears down the notify background
    // task and closes the subscription channel. Await it so that clone is
    // released before the `try_unwrap` below.
    let _ = reloader.await;

    let state = std::sync::Arc::try_unwrap(state)
        .unwrap_or_else(|arc| panic!("ingress state still has {} outstanding references at shutdown", std::sync::Arc::strong_count(&arc)));
    state.pipeline.shutdown().await;

    log::info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
