//! File sink driver: NDJSON lines with size/age/count rotation.
//!
//! Rotation is hand-rolled rather than pulled from a crate: nothing in the
//! corpus depends on a log-rotation library, and the policy named in the
//! spec (`max_size_mb`, `max_backups`, `max_age_days`, `compress_old`) is
//! small enough to own directly. Writes are serialized behind a `Mutex`
//! since two shards' batch writers can call the same driver concurrently
//! (§5: drivers must be safe under concurrent `write`, or serialize
//! per-driver — this driver picks the latter).

use super::SinkDriver;
use crate::validator::ValidatedRecord;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RotationPolicy {
    pub max_size_bytes: u64,
    pub max_backups: usize,
    pub max_age: std::time::Duration,
    pub compress_old: bool,
}

struct State {
    file: File,
    size: u64,
    opened_at: SystemTime,
}

pub struct FileSink {
    path: PathBuf,
    policy: RotationPolicy,
    state: Mutex<State>,
}

impl FileSink {
    pub fn open(path: impl Into<PathBuf>, policy: RotationPolicy) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            policy,
            state: Mutex::new(State {
                file,
                size,
                opened_at: SystemTime::now(),
            }),
        })
    }

    fn backup_path(base: &Path, index: usize) -> PathBuf {
        let mut name = base.as_os_str().to_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    /// Gzips `path`'s contents in place, keeping the rotation-numbered name
    /// unchanged so the shift-up loop in `rotate` doesn't need to track a
    /// separate `.gz` extension per backup slot.
    fn compress_in_place(path: &Path) -> anyhow::Result<()> {
        let raw = std::fs::read(path)?;
        let tmp = path.with_extension("gz-tmp");
        {
            let out = File::create(&tmp)?;
            let mut encoder = GzEncoder::new(out, Compression::default());
            encoder.write_all(&raw)?;
            encoder.finish()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn rotate(&self, state: &mut State) -> anyhow::Result<()> {
        // shift existing backups up by one, dropping anything past max_backups
        if self.policy.max_backups > 0 {
            for index in (1..self.policy.max_backups).rev() {
                let from = Self::backup_path(&self.path, index);
                let to = Self::backup_path(&self.path, index + 1);
                if from.exists() {
                    let _ = std::fs::rename(&from, &to);
                }
            }
            let first_backup = Self::backup_path(&self.path, 1);
            if self.path.exists() {
                std::fs::rename(&self.path, &first_backup)?;
                if self.policy.compress_old {
                    Self::compress_in_place(&first_backup)?;
                }
            }
            let excess = Self::backup_path(&self.path, self.policy.max_backups + 1);
            if excess.exists() {
                let _ = std::fs::remove_file(&excess);
            }
        } else if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        state.file = file;
        state.size = 0;
        state.opened_at = SystemTime::now();
        Ok(())
    }

    fn needs_rotation(&self, state: &State, incoming: u64) -> bool {
        let size_exceeded = state.size + incoming > self.policy.max_size_bytes;
        let age_exceeded = state
            .opened_at
            .elapsed()
            .map(|age| age > self.policy.max_age)
            .unwrap_or(false);
        size_exceeded || age_exceeded
    }
}

#[async_trait]
impl SinkDriver for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.file.flush()?;
        Ok(())
    }

    async fn write(&self, _deadline: Instant, batch: &[ValidatedRecord]) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;

        let mut payload = String::new();
        for record in batch {
            let body: serde_json::Value = serde_json::from_slice(&record.body)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&record.body).into_owned()));
            let line = serde_json::json!({ "type": "zoom", "body": body });
            payload.push_str(&serde_json::to_string(&line)?);
            payload.push('\n');
        }
        let bytes = payload.as_bytes();

        if self.needs_rotation(&state, bytes.len() as u64) {
            self.rotate(&mut state)?;
        }

        state.file.write_all(bytes)?;
        state.file.flush()?;
        state.size += bytes.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_policy() -> RotationPolicy {
        RotationPolicy {
            max_size_bytes: 1024 * 1024,
            max_backups: 3,
            max_age: std::time::Duration::from_secs(86400 * 7),
            compress_old: false,
        }
    }

    #[tokio::test]
    async fn writes_ndjson_lines_that_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validated.ndjson");
        let sink = FileSink::open(&path, default_policy()).unwrap();

        let batch = vec![
            ValidatedRecord { body: br#"{"a":1}"#.to_vec() },
            ValidatedRecord { body: br#"{"b":2}"#.to_vec() },
        ];
        sink.write(Instant::now(), &batch).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["type"], "zoom");
        assert_eq!(parsed["body"], serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn rotates_when_size_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validated.ndjson");
        let policy = RotationPolicy {
            max_size_bytes: 10,
            max_backups: 2,
            max_age: std::time::Duration::from_secs(86400),
            compress_old: false,
        };
        let sink = FileSink::open(&path, policy).unwrap();

        sink.write(Instant::now(), &[ValidatedRecord { body: b"{}".to_vec() }]).await.unwrap();
        sink.write(Instant::now(), &[ValidatedRecord { body: b"{}".to_vec() }]).await.unwrap();

        assert!(path.exists());
        assert!(backup_exists(&path));
    }

    fn backup_exists(path: &Path) -> bool {
        let mut backup = path.as_os_str().to_os_string();
        backup.push(".1");
        PathBuf::from(backup).exists()
    }

    #[tokio::test]
    async fn compress_old_gzips_the_rotated_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validated.ndjson");
        let policy = RotationPolicy {
            max_size_bytes: 10,
            max_backups: 2,
            max_age: std::time::Duration::from_secs(86400),
            compress_old: true,
        };
        let sink = FileSink::open(&path, policy).unwrap();

        sink.write(Instant::now(), &[ValidatedRecord { body: b"{}".to_vec() }]).await.unwrap();
        sink.write(Instant::now(), &[ValidatedRecord { body: b"{}".to_vec() }]).await.unwrap();

        let mut backup = path.as_os_str().to_os_string();
        backup.push(".1");
        let backup = PathBuf::from(backup);
        assert!(backup.exists());

        let raw = std::fs::read(&backup).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b], "rotated backup should start with the gzip magic bytes");

        let mut decoder = flate2::read::GzDecoder::new(&raw[..]);
        let mut decompressed = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut decompressed).unwrap();
        assert!(decompressed.contains(r#"{"type":"zoom""#));
    }
}
