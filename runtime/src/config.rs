//! Service configuration.
//!
//! A single TOML file, loaded from `--config`/`ZOOM_INGEST_CONFIG`: a
//! versioned on-disk shape (`*FileV1`, every field `#[serde(default)]`) is
//! fallibly converted (`TryFrom`) into a validated runtime struct that fills
//! in defaults and rejects impossible values. The file is watched with
//! `notify`; on change it is reloaded and swapped behind an
//! `RwLock<Arc<_>>` the same way the toolkit config watcher this is
//! generalized from does it.
//!
//! Every field is re-parsed on reload, but only the output driver list is
//! actually wired to something live: `spawn_sink_reloader` subscribes to
//! `ConfigWatcher::subscribe()` and rebuilds the pipeline's sink set. Shard,
//! queue, and batch topology are read once at startup (changing them
//! requires a restart) even though the reloaded snapshot technically carries
//! new values for them.

use {
    notify::{Event, RecommendedWatcher, RecursiveMode, Watcher},
    serde::Deserialize,
    std::{
        fs,
        path::{Path, PathBuf},
        sync::{Arc, RwLock},
        time::Duration,
    },
};

pub const ENV_CONFIG_PATH: &str = "ZOOM_INGEST_CONFIG";
pub const ENV_SECRET_TOKEN_DEFAULT: &str = "ZOOM_WEBHOOK_SECRET_TOKEN";

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;
const DEFAULT_SHARDS: usize = 4;
const DEFAULT_QUEUE_SIZE: usize = 4096;
const DEFAULT_VALIDATORS_PER_SHARD: usize = 1;
const DEFAULT_BATCH_MAX_COUNT: usize = 256;
const DEFAULT_BATCH_LINGER_MS: u64 = 1;
const DEFAULT_HTTP_PARALLEL: usize = 4;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 2000;

#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub listen: String,
    pub max_body_bytes: u64,
    pub shard_count: usize,
    pub queue_size: usize,
    pub validators_per_shard: usize,
    pub batch_max_count: usize,
    pub batch_linger: Duration,
    pub fanout_timeout: Duration,
    pub secret_env: String,
    pub legacy_signature_fallback: bool,
    pub outputs: Vec<OutputConfig>,
    source_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub enum OutputConfig {
    File {
        path: PathBuf,
        max_size_bytes: u64,
        max_backups: usize,
        max_age: Duration,
        compress_old: bool,
    },
    Http {
        url: String,
        timeout: Duration,
        parallel: usize,
        token_env: Option<String>,
    },
}

impl IngestConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var(ENV_CONFIG_PATH).ok() {
            Some(path) => Self::from_path(path),
            None => Ok(Self::defaults()),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        let mut cfg = Self::from_toml_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?;
        cfg.source_path = Some(path.to_path_buf());
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let file: ConfigFileV1 = toml::from_str(text)?;
        Self::try_from(file)
    }

    pub fn defaults() -> Self {
        ConfigFileV1::default().try_into().expect("built-in defaults are always valid")
    }

    fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct ConfigFileV1 {
    #[serde(default)]
    server: ServerFileV1,
    #[serde(default)]
    shards: ShardsFileV1,
    #[serde(default)]
    batch: BatchFileV1,
    #[serde(default)]
    zoom: ZoomFileV1,
    #[serde(default)]
    outputs: Vec<OutputFileV1>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct ServerFileV1 {
    listen: Option<String>,
    max_body_bytes: Option<u64>,
    #[serde(default)]
    tls: TlsFileV1,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct TlsFileV1 {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    #[allow(dead_code)]
    cert_file: String,
    #[serde(default)]
    #[allow(dead_code)]
    key_file: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct ShardsFileV1 {
    count: Option<usize>,
    queue_size: Option<usize>,
    validators_per_shard: Option<usize>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct BatchFileV1 {
    max_count: Option<usize>,
    linger_ms: Option<u64>,
    fanout_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct ZoomFileV1 {
    secret_env: Option<String>,
    #[serde(default)]
    legacy_signature_fallback: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OutputFileV1 {
    File {
        path: String,
        #[serde(default)]
        max_size_mb: Option<u64>,
        #[serde(default)]
        max_backups: Option<usize>,
        #[serde(default)]
        max_age_days: Option<u64>,
        #[serde(default)]
        compress_old: bool,
    },
    Http {
        url: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        parallel: Option<usize>,
        #[serde(default)]
        token_env: Option<String>,
    },
}

impl TryFrom<ConfigFileV1> for IngestConfig {
    type Error = anyhow::Error;

    fn try_from(file: ConfigFileV1) -> Result<Self, Self::Error> {
        // Zero and absent are documented as equivalent (§6): a zero in the
        // file falls back to the same default an absent key would.
        let shard_count = match file.shards.count {
            None | Some(0) => DEFAULT_SHARDS,
            Some(n) => n,
        };
        if !shard_count.is_power_of_two() {
            anyhow::bail!("shards.count must be a power of two, got {shard_count}");
        }

        let queue_size = match file.shards.queue_size {
            None | Some(0) => DEFAULT_QUEUE_SIZE,
            Some(n) => n,
        };

        let validators_per_shard = match file.shards.validators_per_shard {
            None | Some(0) => DEFAULT_VALIDATORS_PER_SHARD,
            Some(n) => n,
        };

        let batch_max_count = match file.batch.max_count {
            None | Some(0) => DEFAULT_BATCH_MAX_COUNT,
            Some(n) => n,
        };

        let mut outputs = Vec::with_capacity(file.outputs.len());
        for output in file.outputs {
            outputs.push(match output {
                OutputFileV1::File { path, max_size_mb, max_backups, max_age_days, compress_old } => {
                    OutputConfig::File {
                        path: PathBuf::from(path),
                        max_size_bytes: max_size_mb.unwrap_or(100) * 1024 * 1024,
                        max_backups: max_backups.unwrap_or(5),
                        max_age: Duration::from_secs(max_age_days.unwrap_or(7) * 86400),
                        compress_old,
                    }
                }
                OutputFileV1::Http { url, timeout_ms, parallel, token_env } => OutputConfig::Http {
                    url,
                    timeout: Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS)),
                    parallel: parallel.unwrap_or(DEFAULT_HTTP_PARALLEL),
                    token_env,
                },
            });
        }

        Ok(Self {
            listen: file.server.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
            max_body_bytes: file.server.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            shard_count,
            queue_size,
            validators_per_shard,
            batch_max_count,
            batch_linger: Duration::from_millis(file.batch.linger_ms.unwrap_or(DEFAULT_BATCH_LINGER_MS)),
            fanout_timeout: Duration::from_millis(file.batch.fanout_timeout_ms.unwrap_or(5000)),
            secret_env: file.zoom.secret_env.unwrap_or_else(|| ENV_SECRET_TOKEN_DEFAULT.to_string()),
            legacy_signature_fallback: file.zoom.legacy_signature_fallback,
            outputs,
            source_path: None,
        })
    }
}

/// Config holder with automatic file watching, mirroring the toolkit
/// runtime's `Config`/`notify` hot-reload pattern this was generalized from.
pub struct ConfigWatcher {
    config: Arc<RwLock<Arc<IngestConfig>>>,
    changes: tokio::sync::watch::Sender<Arc<IngestConfig>>,
    #[allow(dead_code)]
    watcher: Option<RecommendedWatcher>,
}

impl ConfigWatcher {
    pub fn from_env() -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(IngestConfig::from_env()?);
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Arc<IngestConfig>) -> Arc<Self> {
        let path = config.source_path().map(Path::to_path_buf);
        let (changes, _) = tokio::sync::watch::channel(config.clone());
        let holder = Arc::new(RwLock::new(config));

        let watcher = path.and_then(|p| {
            Self::start_watcher(p, Arc::clone(&holder), changes.clone())
                .map_err(|e| log::warn!("failed to start config file watcher: {e}"))
                .ok()
        });

        Arc::new(Self { config: holder, changes, watcher })
    }

    pub fn current(&self) -> Arc<IngestConfig> {
        self.config.read().unwrap().clone()
    }

    /// Subscribes to config reloads. Every successful reload (the whole file,
    /// not just `[[outputs]]`) sends the new snapshot; callers that only
    /// care about the sink list still need to diff it themselves.
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Arc<IngestConfig>> {
        self.changes.subscribe()
    }

    fn start_watcher(
        path: PathBuf,
        config: Arc<RwLock<Arc<IngestConfig>>>,
        changes: tokio::sync::watch::Sender<Arc<IngestConfig>>,
    ) -> anyhow::Result<RecommendedWatcher> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if event.kind.is_modify() || event.kind.is_create() {
                    let _ = tx.try_send(());
                }
            }
        })?;

        let watch_path = path.parent().unwrap_or(&path);
        watcher.watch(watch_path, RecursiveMode::NonRecursive)?;
        log::info!("started config file watcher for {}", path.display());

        let reload_path = path.clone();
        tokio::spawn(async move {
            let debounce = Duration::from_millis(500);
            while rx.recv().await.is_some() {
                tokio::time::sleep(debounce).await;
                while rx.try_recv().is_ok() {}

                match IngestConfig::from_path(&reload_path) {
                    Ok(new_config) => {
                        let new_config = Arc::new(new_config);
                        *config.write().unwrap() = new_config.clone();
                        let _ = changes.send(new_config);
                        log::info!("reloaded config from {}", reload_path.display());
                    }
                    Err(e) => log::error!("failed to reload config from {}: {e}", reload_path.display()),
                }
            }
        });

        Ok(watcher)
    }
}
