//! Sink Manager (SM) and the `SinkDriver` capability trait.
//!
//! Drivers are an open-polymorphic set behind exactly four operations —
//! `start`, `stop`, `write`, `name` — modeled as a trait rather than a tagged
//! enum so new drivers can be added without touching the manager. Fan-out is
//! capability-only: the manager never downcasts to a concrete driver type.

pub mod file;
pub mod http;

use crate::validator::ValidatedRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[async_trait]
pub trait SinkDriver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
    async fn write(&self, deadline: Instant, batch: &[ValidatedRecord]) -> anyhow::Result<()>;
}

/// The pipeline's live reference to its active sink set. A `reload_sink`
/// swaps the inner `Arc` so in-flight batch writers that already hold a
/// clone of the old `Arc<SinkManager>` finish fanning out against it
/// undisturbed, while the next flush picks up the new one.
pub type SinkHandle = Arc<RwLock<Arc<SinkManager>>>;

/// Owns N sink drivers and fans a batch out to all of them concurrently.
pub struct SinkManager {
    drivers: Vec<Box<dyn SinkDriver>>,
}

impl SinkManager {
    pub fn new(drivers: Vec<Box<dyn SinkDriver>>) -> Self {
        Self { drivers }
    }

    /// Opens every driver in declaration order, failing fast on the first
    /// error (drivers already started are left open; the caller aborts
    /// startup entirely in that case, so there is nothing useful to unwind).
    pub async fn start(&self) -> anyhow::Result<()> {
        for driver in &self.drivers {
            driver
                .start()
                .await
                .map_err(|source| anyhow::anyhow!("sink '{}' failed to start: {source:#}", driver.name()))?;
        }
        Ok(())
    }

    /// Closes every driver in reverse declaration order. Stop errors are
    /// logged and otherwise ignored so one stuck driver can't block the rest
    /// of shutdown.
    pub async fn stop(&self) {
        for driver in self.drivers.iter().rev() {
            if let Err(err) = driver.stop().await {
                log::warn!("sink '{}' failed to stop cleanly: {err:#}", driver.name());
            }
        }
    }

    /// Writes `batch` to every driver concurrently, waits for all of them to
    /// settle, and returns the first error observed (if any). Never retries.
    pub async fn fan_out(&self, deadline: Instant, batch: &[ValidatedRecord]) -> anyhow::Result<()> {
        let writes = self
            .drivers
            .iter()
            .map(|driver| driver.write(deadline, batch));
        let results = futures::future::join_all(writes).await;
        results.into_iter().find_map(|r| r.err()).map_or(Ok(()), Err)
    }
}
