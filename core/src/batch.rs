//! Batch Writer (BW).
//!
//! One per shard. Accumulates `ValidatedRecord`s from the validator workers
//! and flushes to the Sink Manager when the buffer reaches `max_count`, when
//! the linger timer fires with at least one record buffered, when the input
//! channel closes, or on shutdown. The timer is reset after every flush
//! (periodic-tick semantics are also spec-compliant; this implementation
//! picks reset-on-flush, see DESIGN.md).

use crate::metrics;
use crate::sink::SinkHandle;
use crate::trace::{NullTracer, SpanRecorder};
use crate::validator::ValidatedRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub struct BatchConfig {
    pub shard: usize,
    pub max_count: usize,
    pub linger: Duration,
    pub fanout_timeout: Duration,
    pub tracer: Arc<dyn SpanRecorder>,
}

impl BatchConfig {
    /// Convenience constructor for callers that don't wire a tracer.
    pub fn new(shard: usize, max_count: usize, linger: Duration, fanout_timeout: Duration) -> Self {
        Self {
            shard,
            max_count,
            linger,
            fanout_timeout,
            tracer: Arc::new(NullTracer),
        }
    }
}

/// Drives one shard's batch buffer until `validated_rx` closes or `shutdown`
/// fires, performing exactly one final flush of any remainder either way.
pub async fn run(
    mut validated_rx: mpsc::Receiver<ValidatedRecord>,
    sink: SinkHandle,
    config: BatchConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut buffer: Vec<ValidatedRecord> = Vec::with_capacity(config.max_count);

    loop {
        let sleep = tokio::time::sleep(config.linger);
        tokio::pin!(sleep);

        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    flush_if_nonempty(&mut buffer, &sink, &config).await;
                    // drain whatever arrived concurrently, best-effort
                    while let Ok(record) = validated_rx.try_recv() {
                        buffer.push(record);
                    }
                    flush_if_nonempty(&mut buffer, &sink, &config).await;
                    return;
                }
            }

            maybe_record = validated_rx.recv() => {
                match maybe_record {
                    Some(record) => {
                        buffer.push(record);
                        if buffer.len() >= config.max_count {
                            flush(&mut buffer, &sink, &config).await;
                        }
                    }
                    None => {
                        flush_if_nonempty(&mut buffer, &sink, &config).await;
                        return;
                    }
                }
            }

            _ = &mut sleep => {
                if !buffer.is_empty() {
                    flush(&mut buffer, &sink, &config).await;
                }
            }
        }
    }
}

async fn flush_if_nonempty(buffer: &mut Vec<ValidatedRecord>, sink: &SinkHandle, config: &BatchConfig) {
    if !buffer.is_empty() {
        flush(buffer, sink, config).await;
    }
}

async fn flush(buffer: &mut Vec<ValidatedRecord>, sink: &SinkHandle, config: &BatchConfig) {
    let batch: Vec<ValidatedRecord> = std::mem::take(buffer);
    let len = batch.len();
    let deadline = Instant::now() + config.fanout_timeout;
    let current = sink.read().await.clone();

    match current.fan_out(deadline, &batch).await {
        Ok(()) => {
            metrics::BATCH_FLUSH_TOTAL.inc();
            metrics::BATCH_ITEMS.observe(len as f64);
            config.tracer.on_flush(config.shard, len);
        }
        Err(err) => {
            metrics::OUTPUT_ERRORS.with_label_values(&["fanout"]).inc();
            log::warn!("fan-out failed for a batch of {len} records: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{SinkDriver, SinkManager};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct RecordingSink {
        name: &'static str,
        seen: Arc<Mutex<Vec<Vec<Vec<u8>>>>>,
    }

    #[async_trait]
    impl SinkDriver for RecordingSink {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn write(&self, _deadline: Instant, batch: &[ValidatedRecord]) -> anyhow::Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push(batch.iter().map(|r| r.body.clone()).collect());
            Ok(())
        }
    }

    #[tokio::test]
    async fn flushes_on_max_count() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: SinkHandle = Arc::new(tokio::sync::RwLock::new(Arc::new(SinkManager::new(vec![Box::new(RecordingSink {
            name: "rec",
            seen: seen.clone(),
        })]))));

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let config = BatchConfig::new(0, 2, Duration::from_secs(60), Duration::from_secs(1));

        let handle = tokio::spawn(run(rx, sink, config, shutdown_rx));
        tx.send(ValidatedRecord { body: b"a".to_vec() }).await.unwrap();
        tx.send(ValidatedRecord { body: b"b".to_vec() }).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let batches = seen.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn flushes_on_linger_with_partial_buffer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: SinkHandle = Arc::new(tokio::sync::RwLock::new(Arc::new(SinkManager::new(vec![Box::new(RecordingSink {
            name: "rec",
            seen: seen.clone(),
        })]))));

        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let config = BatchConfig::new(0, 256, Duration::from_millis(20), Duration::from_secs(1));

        let handle = tokio::spawn(run(rx, sink, config, shutdown_rx));
        tx.send(ValidatedRecord { body: b"solo".to_vec() }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        shutdown_tx.send(true).unwrap();
        drop(tx);
        handle.await.unwrap();

        let batches = seen.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![b"solo".to_vec()]);
    }

    #[tokio::test]
    async fn final_flush_on_shutdown() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: SinkHandle = Arc::new(tokio::sync::RwLock::new(Arc::new(SinkManager::new(vec![Box::new(RecordingSink {
            name: "rec",
            seen: seen.clone(),
        })]))));

        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let config = BatchConfig::new(0, 256, Duration::from_secs(60), Duration::from_secs(1));

        let handle = tokio::spawn(run(rx, sink, config, shutdown_rx));
        tx.send(ValidatedRecord { body: b"pending".to_vec() }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let batches = seen.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![b"pending".to_vec()]);
    }
}
