//! warp HTTP glue for the ingestion pipeline: route construction, the
//! ingress handler, config loading/hot-reload, and the bootstrap sequence
//! that wires `zoom-ingest-core` components to a bound listener.

pub mod config;
pub mod ingress;
pub mod sinks;

use config::{ConfigWatcher, IngestConfig};
use ingress::IngressState;
use std::sync::Arc;
use zoom_ingest_core::sink::SinkManager;
use zoom_ingest_core::{Pipeline, PipelineConfig};

pub use zoom_ingest_core::error::{IngestError, Result};

/// Reads the HMAC secret from the environment variable named by
/// `cfg.secret_env`. Fatal (per §6/§7) if unset.
pub fn load_secret(cfg: &IngestConfig) -> Result<Arc<Vec<u8>>> {
    std::env::var(&cfg.secret_env)
        .map(|v| Arc::new(v.into_bytes()))
        .map_err(|_| IngestError::SecretMissing(cfg.secret_env.clone()))
}

/// Assembles the pipeline, sinks, and ingress state from a loaded config and
/// secret. Does not bind a listener; callers compose the returned filter
/// with `warp::serve`.
pub async fn build(cfg: Arc<IngestConfig>, secret: Arc<Vec<u8>>) -> Result<Arc<IngressState>> {
    let drivers = sinks::build(&cfg.outputs).map_err(|source| IngestError::SinkStart { driver: "manager", source })?;
    let sink = Arc::new(SinkManager::new(drivers));

    let pipeline_config = PipelineConfig {
        shard_count: cfg.shard_count,
        queue_size: cfg.queue_size,
        validators_per_shard: cfg.validators_per_shard,
        batch_max_count: cfg.batch_max_count,
        batch_linger: cfg.batch_linger,
        fanout_timeout: cfg.fanout_timeout,
    };
    let pipeline = Pipeline::start(pipeline_config, sink, secret.clone()).await?;

    Ok(Arc::new(IngressState {
        pipeline,
        secret,
        max_body_bytes: cfg.max_body_bytes,
    }))
}

/// Loads config from the environment (file or defaults), watching for
/// changes to the outputs list.
pub fn load_config_watcher() -> anyhow::Result<Arc<ConfigWatcher>> {
    ConfigWatcher::from_env()
}

/// Spawns a background task that rebuilds the sink set whenever the watched
/// config file's `[[outputs]]` list changes (or the file is edited at all,
/// since reload is all-or-nothing per snapshot) and swaps it into the
/// running pipeline without dropping in-flight batches. Shard/queue/batch
/// topology is read once at startup and is not affected by a reload; only
/// the sink list changes live. No-op if the config wasn't loaded from a
/// watched file. The returned task exits once `watcher` (and every other
/// clone of it) is dropped, so callers doing an orderly shutdown should
/// drop their `Arc<ConfigWatcher>` and await the handle before tearing down
/// the pipeline.
pub fn spawn_sink_reloader(state: Arc<IngressState>, watcher: Arc<ConfigWatcher>) -> tokio::task::JoinHandle<()> {
    let mut changes = watcher.subscribe();
    drop(watcher);
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let cfg = changes.borrow_and_update().clone();
            match sinks::build(&cfg.outputs) {
                Ok(drivers) => {
                    let new_sink = Arc::new(SinkManager::new(drivers));
                    match state.pipeline.reload_sink(new_sink).await {
                        Ok(()) => log::info!("reloaded {} sink driver(s) from updated config", cfg.outputs.len()),
                        Err(e) => log::error!("failed to start reloaded sinks, keeping previous set: {e:#}"),
                    }
                }
                Err(e) => log::error!("failed to build sinks from reloaded config: {e:#}"),
            }
        }
    });
}
