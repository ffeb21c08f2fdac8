use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use meter_auth::{EncryptionKey, KeyLoadError, SigningKey};
use meter_config::Config;
use meter_metrics::{MetricSample, optimize};
use meter_statsd::metric;
use meter_store::{MemoryStore, MetricStore};
use meter_threading::{WorkerPool, WorkerPoolBuilder};
use parking_lot::Mutex;
use tokio::sync::{OnceCell, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::payload::{PayloadEncoder, Upload};
use crate::sampler::Sampler;
use crate::statsd::AgentCounters;
use crate::upstream::{UpstreamClient, UpstreamError};

/// An error starting the agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The public key for payload encryption could not be loaded.
    #[error("failed to load encryption key")]
    EncryptionKey(#[from] KeyLoadError),
    /// The HTTP client could not be created.
    #[error("failed to create upstream client")]
    Upstream(#[from] UpstreamError),
}

/// Stops a timer started by the [`Agent`].
///
/// Dropping the handle also stops the timer, but does not wait for it.
#[derive(Debug)]
pub struct StopHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl StopHandle {
    /// Stops the timer and waits for a running cycle to finish.
    ///
    /// In-flight deliveries are drained, not aborted.
    pub async fn stop(self) {
        self.stop.send(()).ok();

        if let Err(error) = self.task.await {
            meter_log::error!(
                error = &error as &dyn Error,
                "agent timer terminated abnormally"
            );
        }
    }
}

struct Inner {
    config: Arc<Config>,
    store: MemoryStore,
    sampler: Mutex<Sampler>,
    encoder: PayloadEncoder,
    upstream: UpstreamClient,
    pool: WorkerPool,
    batch_mode: OnceCell<bool>,
    collecting: AtomicBool,
    delivering: AtomicBool,
}

impl Inner {
    async fn collect(&self) {
        let samples = self.sampler.lock().sample();

        if let Err(error) = self.store.set_many(samples).await {
            meter_log::error!(
                error = &error as &dyn Error,
                "failed to record runtime statistics"
            );
            return;
        }

        metric!(counter(AgentCounters::Collect) += 1);
    }

    async fn batch_mode(&self) -> bool {
        *self
            .batch_mode
            .get_or_init(|| async {
                let available = self.upstream.ping().await;
                meter_log::info!(
                    batch = available,
                    "checked collector at {}",
                    self.upstream.base_url()
                );
                available
            })
            .await
    }

    fn uploads(&self, samples: Vec<MetricSample>, batch_mode: bool) -> Vec<Upload> {
        let encoded = if batch_mode {
            optimize(samples)
                .chunks(self.config.batch_size())
                .map(|chunk| self.encoder.batch(chunk))
                .collect::<Vec<_>>()
        } else {
            samples
                .iter()
                .flat_map(|sample| [Ok(self.encoder.plain(sample)), self.encoder.single(sample)])
                .collect()
        };

        encoded
            .into_iter()
            .filter_map(|result| match result {
                Ok(upload) => Some(upload),
                Err(error) => {
                    metric!(counter(AgentCounters::DeliveryFailed) += 1);
                    meter_log::error!(
                        error = &error as &dyn Error,
                        "failed to encode metrics"
                    );
                    None
                }
            })
            .collect()
    }

    async fn upload(&self, upload: Upload) {
        metric!(counter(AgentCounters::DeliveryAttempt) += 1);

        if let Err(error) = self.upstream.send(&upload).await {
            metric!(counter(AgentCounters::DeliveryFailed) += 1);
            meter_log::error!(
                error = &error as &dyn Error,
                path = %upload.segments.join("/"),
                "failed to deliver metrics"
            );
        }
    }

    async fn deliver(self: &Arc<Self>) {
        let batch_mode = self.batch_mode().await;

        let lookup = match self.store.get_many(self.config.metric_names()).await {
            Ok(lookup) => lookup,
            Err(error) => {
                meter_log::error!(error = &error as &dyn Error, "failed to read metrics");
                return;
            }
        };

        if !lookup.missing.is_empty() {
            meter_log::debug!("metrics not sampled yet: {}", lookup.missing.join(", "));
        }

        let uploads = self.uploads(lookup.found, batch_mode);
        let (sender, jobs) = self.pool.channel();

        let produce = async move {
            for upload in uploads {
                if sender.send_async(upload).await.is_err() {
                    break;
                }
            }
        };

        let inner = Arc::clone(self);
        let consume = self.pool.run(jobs, move |upload| {
            let inner = Arc::clone(&inner);
            async move { inner.upload(upload).await }
        });

        tokio::join!(produce, consume);
    }
}

/// Repeats `tick` every `period` until `stop` resolves. The first tick fires immediately.
async fn run_timer<F, Fut>(period: Duration, mut stop: oneshot::Receiver<()>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = interval.tick() => tick().await,
        }
    }
}

/// Samples runtime statistics and delivers them to the collector.
///
/// Collection and delivery run on independent timers. Each timer can be started once; starting it
/// again while it runs returns `None`.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    /// Creates an agent from the configuration.
    ///
    /// Must be called from within a tokio runtime. Delivery workers are spawned on it.
    pub async fn new(config: Arc<Config>) -> Result<Self, AgentError> {
        let signing_key = config.agent_key().map(SigningKey::new);
        let encryption_key = config
            .agent_crypto_key()
            .map(EncryptionKey::from_file)
            .transpose()?;

        let upstream =
            UpstreamClient::new(config.upstream_address(), config.request_timeout()).await?;

        let pool = WorkerPoolBuilder::new(tokio::runtime::Handle::current())
            .worker_name(|index| format!("delivery-{index}"))
            .num_workers(config.delivery_concurrency())
            .build();

        let inner = Inner {
            store: MemoryStore::new(),
            sampler: Mutex::new(Sampler::new()),
            encoder: PayloadEncoder::new(signing_key, encryption_key),
            upstream,
            pool,
            batch_mode: OnceCell::new(),
            collecting: AtomicBool::new(false),
            delivering: AtomicBool::new(false),
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Returns the local buffer of sampled metrics.
    pub fn store(&self) -> &MemoryStore {
        &self.inner.store
    }

    /// Runs a single collection cycle.
    pub async fn collect(&self) {
        self.inner.collect().await
    }

    /// Runs a single delivery cycle and waits until every upload has completed or failed.
    ///
    /// The first cycle asks the collector whether it supports batches.
    pub async fn deliver(&self) {
        self.inner.deliver().await
    }

    /// Starts sampling on the poll interval.
    ///
    /// Returns `None` if collection is already running.
    pub fn start_collecting(&self) -> Option<StopHandle> {
        if self.inner.collecting.swap(true, Ordering::AcqRel) {
            return None;
        }

        let inner = Arc::clone(&self.inner);
        let (stop, stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            meter_log::debug!("starting collection");
            run_timer(inner.config.poll_interval(), stopped, || inner.collect()).await;
            inner.collecting.store(false, Ordering::Release);
            meter_log::debug!("stopped collection");
        });

        Some(StopHandle { stop, task })
    }

    /// Starts delivery on the report interval.
    ///
    /// Returns `None` if delivery is already running.
    pub fn start_delivering(&self) -> Option<StopHandle> {
        if self.inner.delivering.swap(true, Ordering::AcqRel) {
            return None;
        }

        let inner = Arc::clone(&self.inner);
        let (stop, stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            meter_log::debug!("starting delivery");
            run_timer(inner.config.report_interval(), stopped, || inner.deliver()).await;
            inner.delivering.store(false, Ordering::Release);
            meter_log::debug!("stopped delivery");
        });

        Some(StopHandle { stop, task })
    }
}
