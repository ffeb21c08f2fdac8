use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::builder::{PanicHandler, WorkerPoolBuilder};

/// A pool of `num_workers` asynchronous workers draining a shared job channel.
///
/// See the [crate documentation](crate) for the execution model.
pub struct WorkerPool {
    runtime: tokio::runtime::Handle,
    worker_name: Option<Arc<dyn Fn(usize) -> String + Send + Sync>>,
    panic_handler: Option<Arc<PanicHandler>>,
    num_workers: usize,
}

impl WorkerPool {
    /// Constructs a new [`WorkerPool`] using the configuration specified by [`WorkerPoolBuilder`].
    pub fn new(builder: WorkerPoolBuilder) -> Self {
        Self {
            runtime: builder.runtime,
            worker_name: builder.worker_name,
            panic_handler: builder.panic_handler,
            num_workers: builder.num_workers,
        }
    }

    /// Returns the number of workers spawned by [`run`](Self::run).
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Creates a job channel with capacity for one pending job per worker.
    ///
    /// Producers wait once every worker is busy and one job per worker is queued.
    pub fn channel<T>(&self) -> (flume::Sender<T>, flume::Receiver<T>) {
        flume::bounded(self.num_workers)
    }

    /// Runs `handler` for every job in the channel on exactly `num_workers` workers.
    ///
    /// Returns once all senders are dropped, the channel is empty and every worker has finished.
    pub async fn run<T, F, Fut>(&self, jobs: flume::Receiver<T>, handler: F)
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);

        let handles: Vec<_> = (0..self.num_workers)
            .map(|index| {
                let worker = Worker {
                    index,
                    name: self.worker_name.as_ref().map(|f| f(index)),
                    panic_handler: self.panic_handler.clone(),
                };
                let jobs = jobs.clone();
                let handler = Arc::clone(&handler);
                self.runtime.spawn(worker.run(jobs, handler))
            })
            .collect();

        drop(jobs);

        let mut panic = None;
        for result in futures::future::join_all(handles).await {
            if let Err(error) = result
                && error.is_panic()
            {
                panic.get_or_insert(error.into_panic());
            }
        }

        if let Some(panic) = panic {
            std::panic::resume_unwind(panic);
        }
    }
}

/// A single worker of a [`WorkerPool`].
struct Worker {
    index: usize,
    name: Option<String>,
    panic_handler: Option<Arc<PanicHandler>>,
}

impl Worker {
    async fn run<T, F, Fut>(self, jobs: flume::Receiver<T>, handler: Arc<F>)
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let name = self.name.as_deref().unwrap_or("worker");
        meter_log::trace!(worker = self.index, "{name} started");

        let drain = async {
            while let Ok(job) = jobs.recv_async().await {
                handler(job).await;
            }
        };

        let result = AssertUnwindSafe(drain).catch_unwind().await;

        match (self.panic_handler, result) {
            // Panic handler and error, we swallow the panic and invoke the callback.
            (Some(panic_handler), Err(error)) => {
                meter_log::error!(worker = self.index, "{name} panicked");
                panic_handler(error);
            }
            // No panic handler and error, we propagate the panic.
            (None, Err(error)) => std::panic::resume_unwind(error),
            (_, Ok(())) => meter_log::trace!(worker = self.index, "{name} finished"),
        }
    }
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
