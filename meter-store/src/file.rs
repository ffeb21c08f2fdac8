use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use meter_metrics::MetricSample;
use meter_statsd::metric;

use crate::memory::MemoryStore;
use crate::statsd::StoreTimers;
use crate::store::{Lookup, MetricStore, StoreError};

/// An error reading or writing a [`SnapshotFile`].
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The file could not be read or written.
    #[error("could not access snapshot file {}", .path.display())]
    Io {
        /// Location of the snapshot.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The file does not contain a valid list of samples.
    #[error("could not parse snapshot file {}", .path.display())]
    Parse {
        /// Location of the snapshot.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The background task writing the snapshot did not complete.
    #[error("snapshot task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// A file that holds a full dump of all store entries.
///
/// The file contains a JSON array in the wire format of [`MetricSample`]. Writes go to a
/// temporary file in the same directory which then replaces the previous snapshot atomically.
#[derive(Clone, Debug)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Creates a handle for a snapshot at `path`. The file does not need to exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the location of the snapshot.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads all samples from the snapshot.
    ///
    /// A missing file is an empty snapshot.
    pub fn load(&self) -> Result<Vec<MetricSample>, SnapshotError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };

        serde_json::from_reader(BufReader::new(file)).map_err(|source| SnapshotError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Atomically replaces the snapshot with the given samples.
    pub fn save(&self, samples: &[MetricSample]) -> Result<(), SnapshotError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer(&mut writer, samples).map_err(|source| {
                SnapshotError::Parse {
                    path: self.path.clone(),
                    source,
                }
            })?;
            writer.flush().map_err(|e| self.io_error(e))?;
        }
        temp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        temp.persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;

        Ok(())
    }

    fn io_error(&self, source: io::Error) -> SnapshotError {
        SnapshotError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// A [`MemoryStore`] backed by a [`SnapshotFile`].
///
/// Writes only touch memory. [`MetricStore::persist`] dumps the full contents to the snapshot
/// file, which the collector calls on a timer or after every write. Concurrent calls to `persist`
/// are serialized, so the file always ends up with the most recent dump.
#[derive(Debug)]
pub struct FileStore {
    memory: MemoryStore,
    snapshot: SnapshotFile,
    persist_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Creates an empty store that persists to `snapshot`.
    pub fn new(snapshot: SnapshotFile) -> Self {
        Self {
            memory: MemoryStore::new(),
            snapshot,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a store with the contents of the snapshot.
    ///
    /// A missing snapshot file results in an empty store.
    pub async fn restore(snapshot: SnapshotFile) -> Result<Self, StoreError> {
        let store = Self::new(snapshot);
        store.reload().await?;
        Ok(store)
    }

    /// Replaces the in-memory contents with the contents of the snapshot file.
    ///
    /// Returns the number of restored entries.
    pub async fn reload(&self) -> Result<usize, StoreError> {
        let snapshot = self.snapshot.clone();
        let samples = tokio::task::spawn_blocking(move || snapshot.load())
            .await
            .map_err(SnapshotError::from)??;

        let count = samples.len();
        self.memory.replace(samples);
        Ok(count)
    }

    /// Returns the snapshot file of this store.
    pub fn snapshot(&self) -> &SnapshotFile {
        &self.snapshot
    }
}

#[async_trait]
impl MetricStore for FileStore {
    async fn set(&self, sample: MetricSample) -> Result<MetricSample, StoreError> {
        Ok(self.memory.set_sync(sample))
    }

    async fn set_many(&self, batch: Vec<MetricSample>) -> Result<Vec<MetricSample>, StoreError> {
        Ok(self.memory.set_many_sync(batch))
    }

    async fn get(&self, name: &str) -> Result<Option<MetricSample>, StoreError> {
        Ok(self.memory.get_sync(name))
    }

    async fn get_many(&self, names: &[String]) -> Result<Lookup, StoreError> {
        Ok(self.memory.get_many_sync(names))
    }

    async fn get_all(&self) -> Result<Vec<MetricSample>, StoreError> {
        Ok(self.memory.get_all_sync())
    }

    async fn health(&self) -> bool {
        true
    }

    async fn persist(&self) -> Result<(), StoreError> {
        // Held until the file is replaced. A dump taken later must never be overwritten by an
        // earlier one that was slower to write.
        let _guard = self.persist_lock.lock().await;
        let samples = self.memory.get_all_sync();
        let snapshot = self.snapshot.clone();

        metric!(timer(StoreTimers::SnapshotDuration), {
            tokio::task::spawn_blocking(move || snapshot.save(&samples))
                .await
                .map_err(SnapshotError::from)??;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn counter(name: &str, delta: i64) -> MetricSample {
        MetricSample::counter(name, delta).unwrap()
    }

    fn gauge(name: &str, value: f64) -> MetricSample {
        MetricSample::gauge(name, value).unwrap()
    }

    fn as_set(samples: Vec<MetricSample>) -> HashSet<String> {
        samples.iter().map(|s| serde_json::to_string(s).unwrap()).collect()
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("metrics.json"));
        assert!(snapshot.load().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        fs::write(&path, b"{not json").unwrap();

        let error = SnapshotFile::new(&path).load().unwrap_err();
        assert!(matches!(error, SnapshotError::Parse { .. }));
    }

    #[test]
    fn test_save_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("nested").join("metrics.json"));

        snapshot.save(&[gauge("a", 1.0), counter("b", 2)]).unwrap();
        snapshot.save(&[counter("c", 3)]).unwrap();

        assert_eq!(snapshot.load().unwrap(), vec![counter("c", 3)]);
        // Only the snapshot itself remains, no temporary files.
        let files = fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_snapshot_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("metrics.json"));

        let store = FileStore::new(snapshot.clone());
        for i in 0..20 {
            store.set(counter(&format!("c{i}"), i)).await.unwrap();
            store.set(gauge(&format!("g{i}"), i as f64 * 0.1)).await.unwrap();
        }
        store.set(counter("c3", 10)).await.unwrap();
        store.persist().await.unwrap();

        let restored = FileStore::restore(snapshot).await.unwrap();
        assert_eq!(
            as_set(restored.get_all().await.unwrap()),
            as_set(store.get_all().await.unwrap())
        );
        assert_eq!(restored.get("c3").await.unwrap(), Some(counter("c3", 13)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_persist() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("metrics.json"));
        let store = std::sync::Arc::new(FileStore::new(snapshot.clone()));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    store.set(counter("hits", 1)).await.unwrap();
                    store.set(gauge(&format!("g{i}"), i as f64)).await.unwrap();
                    store.persist().await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            as_set(snapshot.load().unwrap()),
            as_set(store.get_all().await.unwrap())
        );
        assert_eq!(store.get("hits").await.unwrap(), Some(counter("hits", 32)));
    }

    #[tokio::test]
    async fn test_restore_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::restore(SnapshotFile::new(dir.path().join("none.json")))
            .await
            .unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }
}
