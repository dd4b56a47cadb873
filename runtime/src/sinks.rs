//! Builds a `SinkManager` from configured outputs, resolving each HTTP
//! driver's token from its named environment variable (omitted entirely
//! when the variable is configured but unset, per §6).

use crate::config::OutputConfig;
use zoom_ingest_core::sink::{file::FileSink, file::RotationPolicy, http::HttpSink, SinkDriver};

pub fn build(outputs: &[OutputConfig]) -> anyhow::Result<Vec<Box<dyn SinkDriver>>> {
    let mut drivers: Vec<Box<dyn SinkDriver>> = Vec::with_capacity(outputs.len());

    for output in outputs {
        match output {
            OutputConfig::File { path, max_size_bytes, max_backups, max_age, compress_old } => {
                let policy = RotationPolicy {
                    max_size_bytes: *max_size_bytes,
                    max_backups: *max_backups,
                    max_age: *max_age,
                    compress_old: *compress_old,
                };
                drivers.push(Box::new(FileSink::open(path, policy)?));
            }
            OutputConfig::Http { url, timeout, parallel, token_env } => {
                let token = token_env.as_ref().and_then(|name| std::env::var(name).ok());
                drivers.push(Box::new(HttpSink::new(url.clone(), *timeout, *parallel, token)?));
            }
        }
    }

    Ok(drivers)
}
