//! Error kinds for the ingestion pipeline.
//!
//! These map directly to the failure kinds in the service's failure-semantics
//! table: recoverable errors are counted and logged by their caller, fatal
//! errors abort startup. No variant here is ever serialized back to a client;
//! the ingress handler only ever surfaces a status code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("config error: {0}")]
    Config(String),

    #[error("required secret env var '{0}' is not set")]
    SecretMissing(String),

    #[error("listener failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sink '{driver}' failed to start: {source}")]
    SinkStart {
        driver: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("sink '{driver}' write failed: {source}")]
    SinkWrite {
        driver: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
