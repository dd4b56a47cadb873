//! Hot-path ingestion pipeline: signature verification, sharded queues,
//! batching, and sink fan-out. No networking or configuration-file parsing
//! lives here — those are the `runtime` crate's job; this crate is
//! deliberately runtime-agnostic beyond depending on `tokio` for channels
//! and tasks.

pub mod batch;
pub mod crc;
pub mod error;
pub mod metrics;
pub mod shard;
pub mod signature;
pub mod sink;
pub mod trace;
pub mod validator;

use crate::error::{IngestError, Result};
use crate::shard::{ShardRing, ShardRouter};
use crate::sink::{SinkHandle, SinkManager};
use crate::trace::{NullTracer, SpanRecorder};
use crate::validator::ValidatedRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub use error::IngestError as Error;

/// Topology knobs for one running pipeline instance. Shard/queue/batch
/// values are fixed for the process lifetime; only the sink list is
/// hot-reloadable, via `Pipeline::reload_sink`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub shard_count: usize,
    pub queue_size: usize,
    pub validators_per_shard: usize,
    pub batch_max_count: usize,
    pub batch_linger: Duration,
    pub fanout_timeout: Duration,
}

/// One running shard: its ring, the validator threads draining it, and the
/// batch writer task receiving their output.
pub struct Shard {
    pub ring: Arc<ShardRing>,
    validator_threads: Vec<std::thread::JoinHandle<()>>,
    batch_writer: tokio::task::JoinHandle<()>,
}

/// The assembled hot path: router, shards, and the sink manager they all
/// flush into. Constructed once at startup; torn down once at shutdown.
pub struct Pipeline {
    pub router: ShardRouter,
    pub shards: Vec<Shard>,
    pub sink: SinkHandle,
    shutdown_tx: watch::Sender<bool>,
}

impl Pipeline {
    /// Starts every shard's validator threads and batch writer task, and
    /// starts every configured sink driver. Fails fast if any sink fails to
    /// start, per the Sink Manager's contract.
    pub async fn start(config: PipelineConfig, sink: Arc<SinkManager>, secret: Arc<Vec<u8>>) -> Result<Self> {
        sink.start()
            .await
            .map_err(|source| IngestError::SinkStart { driver: "manager", source })?;

        let sink: SinkHandle = Arc::new(tokio::sync::RwLock::new(sink));
        let router = ShardRouter::new(config.shard_count);
        let (shutdown_tx, _) = watch::channel(false);

        let mut shards = Vec::with_capacity(config.shard_count);
        for id in 0..config.shard_count {
            shards.push(spawn_shard(id, &config, sink.clone(), secret.clone(), shutdown_tx.subscribe(), Arc::new(NullTracer)));
        }

        Ok(Self { router, shards, sink, shutdown_tx })
    }

    /// Starts `new_sink`, swaps it in as the active sink set, then stops the
    /// previous one. Start-before-swap-before-stop means there is never a
    /// window with zero sinks attached; a flush racing the swap fans out
    /// against whichever set it read, both of which are fully started.
    pub async fn reload_sink(&self, new_sink: Arc<SinkManager>) -> anyhow::Result<()> {
        new_sink.start().await?;
        let old = {
            let mut guard = self.sink.write().await;
            std::mem::replace(&mut *guard, new_sink)
        };
        old.stop().await;
        Ok(())
    }

    /// Routes and enqueues one ingress event. Returns `false` (never
    /// blocking) if the target shard's ring is full.
    pub fn try_enqueue(&self, event: shard::IngressEvent) -> bool {
        if self.shards.is_empty() {
            return false;
        }
        let idx = self.router.shard_of(&event.body);
        self.shards[idx].ring.try_push(event)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Signals shutdown to every batch writer, waits for them (and the
    /// validator threads, which exit once their ring's senders are all
    /// dropped) to finish, then stops every sink driver in reverse order.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for shard in self.shards {
            for handle in shard.validator_threads {
                let _ = handle.join();
            }
            let _ = shard.batch_writer.await;
        }
        let sink = self.sink.read().await.clone();
        sink.stop().await;
    }
}

fn spawn_shard(
    id: usize,
    config: &PipelineConfig,
    sink: SinkHandle,
    secret: Arc<Vec<u8>>,
    shutdown_rx: watch::Receiver<bool>,
    tracer: Arc<dyn SpanRecorder>,
) -> Shard {
    let ring = Arc::new(ShardRing::new(id, config.queue_size));
    let (validated_tx, validated_rx) = mpsc::channel::<ValidatedRecord>(config.queue_size);

    let validator_threads = (0..config.validators_per_shard.max(1))
        .map(|_| validator::spawn(ring.receiver(), validated_tx.clone(), secret.clone()))
        .collect();
    drop(validated_tx);

    let batch_config = batch::BatchConfig {
        shard: id,
        max_count: config.batch_max_count,
        linger: config.batch_linger,
        fanout_timeout: config.fanout_timeout,
        tracer,
    };
    let batch_writer = tokio::spawn(batch::run(validated_rx, sink, batch_config, shutdown_rx));

    Shard { ring, validator_threads, batch_writer }
}
