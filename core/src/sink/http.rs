//! HTTP sink driver: POSTs a batch as a JSON array to a configured URL,
//! optionally with a `Authorization: Splunk <token>` header, bounded by a
//! semaphore of size `parallel` across concurrent in-flight writes.

use super::SinkDriver;
use crate::validator::ValidatedRecord;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;

pub struct HttpSink {
    url: String,
    client: Client,
    semaphore: Arc<Semaphore>,
    token: Option<String>,
}

impl HttpSink {
    pub fn new(url: String, timeout: std::time::Duration, parallel: usize, token: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url,
            client,
            semaphore: Arc::new(Semaphore::new(parallel.max(1))),
            token,
        })
    }
}

#[async_trait]
impl SinkDriver for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn write(&self, deadline: Instant, batch: &[ValidatedRecord]) -> anyhow::Result<()> {
        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");

        let payloads: Vec<serde_json::Value> = batch
            .iter()
            .map(|record| {
                serde_json::from_slice(&record.body)
                    .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&record.body).into_owned()))
            })
            .collect();

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&payloads);

        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Splunk {token}"));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let response = tokio::time::timeout(remaining, request.send())
            .await
            .map_err(|_| anyhow::anyhow!("http sink write exceeded batch deadline"))??;

        if !response.status().is_success() {
            anyhow::bail!("http sink received non-2xx status {}", response.status());
        }
        Ok(())
    }
}
