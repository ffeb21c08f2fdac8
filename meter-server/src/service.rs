use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ipnetwork::IpNetwork;
use meter_auth::{DecryptionKey, KeyLoadError, SigningKey};
use meter_config::Config;
use meter_metrics::{MetricSample, optimize};
use meter_statsd::metric;
use meter_store::{
    FileStore, Lookup, MemoryStore, MetricStore, SnapshotFile, SqlStore, SqlStoreOptions,
    StoreError,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::statsd::CollectorCounters;

/// Indicates the type of failure of the collector service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The metric store could not be opened.
    #[error("could not initialize metric store")]
    Store(#[from] StoreError),

    /// The private key for encrypted payloads could not be loaded.
    #[error("could not load decryption key")]
    DecryptionKey(#[from] KeyLoadError),
}

/// How the [`MetricService`] keeps its snapshot current.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotMode {
    /// The store persists every write on its own.
    Disabled,
    /// Every successful update writes a snapshot before it is acknowledged.
    Sync,
    /// A timer writes a snapshot at the given interval.
    Interval(Duration),
}

struct SnapshotTask {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Applies incoming samples to the metric store and keeps the snapshot current.
///
/// Batches are reduced with [`optimize`] before they reach the store, so the deltas of duplicate
/// counters within one request are summed up front.
pub struct MetricService {
    store: Arc<dyn MetricStore>,
    mode: SnapshotMode,
    snapshot: Mutex<Option<SnapshotTask>>,
}

impl MetricService {
    /// Creates a service on top of `store`.
    ///
    /// A zero `store_interval` writes through to the snapshot on every update. Durable stores are
    /// never snapshotted.
    pub fn new(store: Arc<dyn MetricStore>, store_interval: Duration) -> Self {
        let mode = if store.is_durable() {
            SnapshotMode::Disabled
        } else if store_interval.is_zero() {
            SnapshotMode::Sync
        } else {
            SnapshotMode::Interval(store_interval)
        };

        Self {
            store,
            mode,
            snapshot: Mutex::new(None),
        }
    }

    /// Opens the store selected by the configuration.
    ///
    /// With a database URL, the relational store is used. Otherwise samples are kept in memory
    /// and snapshotted to the configured file, which is loaded first if `restore` is set. An
    /// empty file path disables snapshots.
    pub async fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let store: Arc<dyn MetricStore> = match config.database_dsn() {
            Some(dsn) => Arc::new(SqlStore::connect(SqlStoreOptions::new(dsn)).await?),
            None if config.file_storage_path().as_os_str().is_empty() => {
                Arc::new(MemoryStore::new())
            }
            None => Arc::new(open_file_store(config).await),
        };

        Ok(Self::new(store, config.store_interval()))
    }

    /// Returns how snapshots are written.
    pub fn snapshot_mode(&self) -> SnapshotMode {
        self.mode
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &dyn MetricStore {
        self.store.as_ref()
    }

    /// Starts the snapshot timer.
    ///
    /// Returns `false` if the timer is already running or snapshots are not written on a timer.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let SnapshotMode::Interval(interval) = self.mode else {
            return false;
        };

        let mut guard = self.snapshot.lock();
        if guard.is_some() {
            return false;
        }

        let store = Arc::clone(&self.store);
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(run_timer(interval, stopped, move || {
            let store = Arc::clone(&store);
            async move { persist(store.as_ref()).await }
        }));

        meter_log::debug!("writing snapshots every {}s", interval.as_secs());
        *guard = Some(SnapshotTask { stop, task });
        true
    }

    /// Stops the snapshot timer and writes a final snapshot.
    ///
    /// Does nothing if the timer was never started.
    pub async fn close(&self) {
        let Some(SnapshotTask { stop, task }) = self.snapshot.lock().take() else {
            return;
        };

        stop.send(()).ok();
        if let Err(error) = task.await {
            meter_log::error!(
                error = &error as &dyn Error,
                "snapshot timer terminated abnormally"
            );
        }

        persist(self.store.as_ref()).await;
        meter_log::info!("wrote final snapshot");
    }

    /// Merges a single sample into the store and returns the stored entry.
    pub async fn apply_single(&self, sample: MetricSample) -> Result<MetricSample, StoreError> {
        let stored = self.store.set(sample).await?;
        metric!(counter(CollectorCounters::SamplesApplied) += 1);
        self.after_update().await;
        Ok(stored)
    }

    /// Optimizes a batch and merges it into the store.
    ///
    /// Returns the stored entries, one for every distinct name in the batch.
    pub async fn apply_batch(
        &self,
        batch: Vec<MetricSample>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let batch = optimize(batch);
        let count = batch.len();

        let result = self.store.set_many(batch).await;
        let applied = match &result {
            Ok(_) => count,
            Err(StoreError::Partial { applied, .. }) => *applied,
            Err(_) => 0,
        };

        metric!(counter(CollectorCounters::SamplesApplied) += applied as i64);
        if applied > 0 {
            self.after_update().await;
        }

        result
    }

    /// Returns the stored entry for `name`.
    pub async fn get(&self, name: &str) -> Result<Option<MetricSample>, StoreError> {
        self.store.get(name).await
    }

    /// Looks up several entries at once.
    pub async fn get_many(&self, names: &[String]) -> Result<Lookup, StoreError> {
        self.store.get_many(names).await
    }

    /// Returns all stored entries.
    pub async fn get_all(&self) -> Result<Vec<MetricSample>, StoreError> {
        self.store.get_all().await
    }

    /// Returns `true` if the store can serve requests.
    pub async fn health(&self) -> bool {
        self.store.health().await
    }

    async fn after_update(&self) {
        if self.mode == SnapshotMode::Sync {
            persist(self.store.as_ref()).await;
        }
    }
}

impl fmt::Debug for MetricService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricService")
            .field("mode", &self.mode)
            .field("running", &self.snapshot.lock().is_some())
            .finish()
    }
}

async fn open_file_store(config: &Config) -> FileStore {
    let store = FileStore::new(SnapshotFile::new(config.file_storage_path()));
    if !config.restore() {
        return store;
    }

    match store.reload().await {
        Ok(count) => {
            meter_log::info!(
                "restored {count} metrics from {}",
                store.snapshot().path().display()
            );
        }
        Err(error) => {
            meter_log::error!(
                error = &error as &dyn Error,
                "failed to restore snapshot, starting empty"
            );
        }
    }
    store
}

async fn persist(store: &dyn MetricStore) {
    if let Err(error) = store.persist().await {
        meter_log::error!(error = &error as &dyn Error, "failed to write snapshot");
    }
}

/// Calls `tick` every `period` until `stop` resolves. The first tick fires after one period.
async fn run_timer<F, Fut>(period: Duration, mut stop: oneshot::Receiver<()>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = interval.tick() => tick().await,
        }
    }
}

struct StateInner {
    config: Arc<Config>,
    metrics: MetricService,
    signing_key: Option<SigningKey>,
    decryption_key: Option<DecryptionKey>,
    trusted_subnet: Option<IpNetwork>,
}

/// Server state shared by all endpoints and middlewares.
#[derive(Clone)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    /// Opens the configured store and loads all keys.
    pub async fn start(config: Arc<Config>) -> Result<Self, ServiceError> {
        let metrics = MetricService::from_config(&config).await?;
        Self::new(config, metrics)
    }

    /// Creates the state around an existing [`MetricService`].
    pub fn new(config: Arc<Config>, metrics: MetricService) -> Result<Self, ServiceError> {
        let decryption_key = config
            .collector_crypto_key()
            .map(DecryptionKey::from_file)
            .transpose()?;

        let inner = StateInner {
            signing_key: config.collector_key().map(SigningKey::new),
            trusted_subnet: config.trusted_subnet(),
            decryption_key,
            metrics,
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Returns the collector configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the metric service.
    pub fn metrics(&self) -> &MetricService {
        &self.inner.metrics
    }

    /// Returns the key used to verify `HashSHA256` headers.
    pub fn signing_key(&self) -> Option<&SigningKey> {
        self.inner.signing_key.as_ref()
    }

    /// Returns the key used to decrypt ciphered payloads.
    pub fn decryption_key(&self) -> Option<&DecryptionKey> {
        self.inner.decryption_key.as_ref()
    }

    /// Returns the network agents must report from.
    pub fn trusted_subnet(&self) -> Option<IpNetwork> {
        self.inner.trusted_subnet
    }
}

impl fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceState")
            .field("metrics", &self.inner.metrics)
            .field("trusted_subnet", &self.inner.trusted_subnet)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use meter_metrics::MetricValue;
    use similar_asserts::assert_eq;

    use super::*;

    fn counter(name: &str, delta: i64) -> MetricSample {
        MetricSample::counter(name, delta).unwrap()
    }

    fn gauge(name: &str, value: f64) -> MetricSample {
        MetricSample::gauge(name, value).unwrap()
    }

    fn file_store(dir: &tempfile::TempDir) -> Arc<FileStore> {
        Arc::new(FileStore::new(SnapshotFile::new(
            dir.path().join("metrics.json"),
        )))
    }

    async fn snapshot_contents(dir: &tempfile::TempDir) -> Vec<MetricSample> {
        let mut samples = SnapshotFile::new(dir.path().join("metrics.json"))
            .load()
            .unwrap();
        samples.sort_by(|a, b| a.name().cmp(b.name()));
        samples
    }

    #[tokio::test]
    async fn test_batch_is_optimized() {
        let service = MetricService::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));

        let stored = service
            .apply_batch(vec![counter("c", 1), gauge("g", 1.0), counter("c", 2), gauge("g", 4.0)])
            .await
            .unwrap();
        assert_eq!(stored, vec![counter("c", 3), gauge("g", 4.0)]);

        let stored = service.apply_single(counter("c", 10)).await.unwrap();
        assert_eq!(stored.value(), MetricValue::Counter(13));
    }

    #[test]
    fn test_snapshot_mode() {
        let memory = || Arc::new(MemoryStore::new());
        assert_eq!(
            MetricService::new(memory(), Duration::ZERO).snapshot_mode(),
            SnapshotMode::Sync
        );
        assert_eq!(
            MetricService::new(memory(), Duration::from_secs(5)).snapshot_mode(),
            SnapshotMode::Interval(Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn test_sync_snapshot_on_every_update() {
        let dir = tempfile::tempdir().unwrap();
        let service = MetricService::new(file_store(&dir), Duration::ZERO);
        assert!(!service.start());

        service.apply_single(gauge("Alloc", 7.0)).await.unwrap();
        assert_eq!(snapshot_contents(&dir).await, vec![gauge("Alloc", 7.0)]);

        service
            .apply_batch(vec![counter("PollCount", 2), counter("PollCount", 3)])
            .await
            .unwrap();
        assert_eq!(
            snapshot_contents(&dir).await,
            vec![gauge("Alloc", 7.0), counter("PollCount", 5)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sync_snapshot_concurrent_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);
        let service = Arc::new(MetricService::new(store.clone(), Duration::ZERO));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    let sample = match i % 2 {
                        0 => counter("PollCount", 1),
                        _ => gauge(&format!("Gauge{i}"), i as f64),
                    };
                    service.apply_single(sample).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut expected = store.get_all().await.unwrap();
        expected.sort_by(|a, b| a.name().cmp(b.name()));
        assert_eq!(expected.len(), 17);
        assert_eq!(snapshot_contents(&dir).await, expected);
    }

    #[tokio::test]
    async fn test_timer_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let service = MetricService::new(file_store(&dir), Duration::from_millis(50));
        assert!(service.start());
        assert!(!service.start());

        service.apply_single(gauge("Alloc", 1.0)).await.unwrap();
        assert!(snapshot_contents(&dir).await.is_empty());

        for _ in 0..200 {
            if !snapshot_contents(&dir).await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(snapshot_contents(&dir).await, vec![gauge("Alloc", 1.0)]);

        service.close().await;
    }

    #[tokio::test]
    async fn test_close_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let service = MetricService::new(file_store(&dir), Duration::from_secs(3600));
        assert!(service.start());

        service.apply_single(counter("PollCount", 4)).await.unwrap();
        service.close().await;

        assert_eq!(snapshot_contents(&dir).await, vec![counter("PollCount", 4)]);
    }

    #[tokio::test]
    async fn test_close_without_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let service = MetricService::new(file_store(&dir), Duration::from_secs(3600));

        service.apply_single(counter("PollCount", 4)).await.unwrap();
        service.close().await;

        assert!(!dir.path().join("metrics.json").exists());
    }

    #[tokio::test]
    async fn test_restore_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        SnapshotFile::new(&path)
            .save(&[gauge("Alloc", 3.0), counter("PollCount", 9)])
            .unwrap();

        let yaml = format!("collector:\n  file_storage_path: {}\n", path.display());
        let config = Config::from_yaml_str(&yaml).unwrap();
        let service = MetricService::from_config(&config).await.unwrap();
        assert_eq!(
            service.get("PollCount").await.unwrap(),
            Some(counter("PollCount", 9))
        );

        let yaml = format!("{yaml}  restore: false\n");
        let config = Config::from_yaml_str(&yaml).unwrap();
        let service = MetricService::from_config(&config).await.unwrap();
        assert!(service.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, "not json").unwrap();

        let yaml = format!("collector:\n  file_storage_path: {}\n", path.display());
        let config = Config::from_yaml_str(&yaml).unwrap();
        let service = MetricService::from_config(&config).await.unwrap();
        assert!(service.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sql_store_is_not_snapshotted() {
        let config = Config::from_yaml_str("collector:\n  database_dsn: 'sqlite::memory:'\n")
            .unwrap();
        let service = MetricService::from_config(&config).await.unwrap();
        assert_eq!(service.snapshot_mode(), SnapshotMode::Disabled);
        assert!(!service.start());
        assert!(service.health().await);
    }
}
