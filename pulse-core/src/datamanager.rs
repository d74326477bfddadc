//! Snapshot persistence for the metrics store.
//!
//! Two independent flows against [`Storage`]: a boot-time restore of the
//! snapshot file and a ticker-driven loop that rewrites the whole file.
//! Snapshots are whole-file rewrites, so no lock is held across I/O
//! beyond the `get_all` call itself.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::error::{PulseError, Result};
use crate::metric::StoreSnapshot;
use crate::storage::Storage;

/// Default snapshot period.
pub const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);

/// Loads and saves metrics data to a snapshot file.
pub struct DataManager {
    storage: Arc<dyn Storage>,
    path: PathBuf,
    store_interval: Duration,
}

impl DataManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        path: impl Into<PathBuf>,
        store_interval: Duration,
    ) -> Self {
        Self { storage, path: path.into(), store_interval }
    }

    fn io_error(&self, source: std::io::Error) -> PulseError {
        PulseError::Io { path: self.path.clone(), source }
    }

    /// Restore the store content from the snapshot file. A missing file
    /// or empty content is success.
    pub async fn restore(&self) -> Result<()> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(self.io_error(e)),
        };

        if data.is_empty() {
            return Ok(());
        }

        let snapshot: StoreSnapshot = serde_json::from_slice(&data)?;

        self.storage.load(snapshot).await
    }

    /// Run the snapshot loop until the shutdown signal fires, then write
    /// one final snapshot and close the file.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(
            file = %self.path.display(),
            interval_secs = self.store_interval.as_secs(),
            "Starting snapshot writer"
        );

        let mut open_options = OpenOptions::new();
        open_options.write(true).create(true);
        #[cfg(unix)]
        open_options.mode(0o644);

        let mut file = open_options.open(&self.path).await.map_err(|e| self.io_error(e))?;

        let mut ticker = tokio::time::interval(self.store_interval);
        // The first tick of a tokio interval fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Stopping snapshot writer");

                    if let Err(error) = self.save(&mut file).await {
                        error!(%error, "failed to write final metrics snapshot");
                    }

                    return Ok(());
                }

                _ = ticker.tick() => {
                    if let Err(error) = self.save(&mut file).await {
                        error!(%error, "failed to write metrics snapshot");
                    }
                }
            }
        }
    }

    /// Rewrite the snapshot file from the current store content: truncate,
    /// rewind, write tab-indented JSON, fsync.
    pub async fn save(&self, file: &mut File) -> Result<()> {
        let metrics = self.storage.get_all().await?;

        let snapshot: StoreSnapshot =
            metrics.into_iter().map(|(id, metric)| (id, metric.value)).collect();

        let mut buf = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"\t"));
        snapshot.serialize(&mut serializer)?;
        buf.push(b'\n');

        file.set_len(0).await.map_err(|e| self.io_error(e))?;
        file.seek(SeekFrom::Start(0)).await.map_err(|e| self.io_error(e))?;
        file.write_all(&buf).await.map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricValue;
    use crate::storage::MemoryStorage;

    fn manager_at(dir: &tempfile::TempDir, name: &str) -> DataManager {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        DataManager::new(storage, dir.path().join(name), DEFAULT_STORE_INTERVAL)
    }

    #[tokio::test]
    async fn test_restore_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(&dir, "absent.json");

        manager.restore().await.unwrap();
        assert!(manager.storage.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_empty_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(&dir, "empty.json");

        tokio::fs::write(manager.path(), b"").await.unwrap();

        manager.restore().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_preserves_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(&dir, "metrics.json");

        manager.storage.set_counter("hits", 3).await.unwrap();
        manager.storage.set_counter("hits", 4).await.unwrap();
        manager.storage.set_gauge("load", 0.75).await.unwrap();

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(manager.path())
            .await
            .unwrap();
        manager.save(&mut file).await.unwrap();

        // The file is tab-indented JSON keyed by metric id.
        let raw = tokio::fs::read_to_string(manager.path()).await.unwrap();
        assert!(raw.contains('\t'));

        let restored = manager_at(&dir, "metrics.json");
        restored.restore().await.unwrap();

        assert_eq!(restored.storage.get_counter("hits").await.unwrap(), 7);
        assert_eq!(restored.storage.get_gauge("load").await.unwrap(), 0.75);
    }

    #[tokio::test]
    async fn test_save_truncates_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(&dir, "metrics.json");

        manager.storage.set_gauge("load", 1.0).await.unwrap();

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(manager.path())
            .await
            .unwrap();

        manager.save(&mut file).await.unwrap();
        let first = tokio::fs::read_to_string(manager.path()).await.unwrap();

        manager.save(&mut file).await.unwrap();
        let second = tokio::fs::read_to_string(manager.path()).await.unwrap();

        // A rewrite of identical content must not grow the file.
        assert_eq!(first.len(), second.len());

        let snapshot: StoreSnapshot = serde_json::from_str(&second).unwrap();
        assert_eq!(snapshot["load"], MetricValue::Gauge(1.0));
    }
}
