use std::any::Any;
use std::sync::Arc;

use crate::pool::WorkerPool;

/// Type alias for a thread safe closure that is used for panic handling across the code.
pub(crate) type PanicHandler = dyn Fn(Box<dyn Any + Send>) + Send + Sync;

/// [`WorkerPoolBuilder`] configures and builds a [`WorkerPool`].
pub struct WorkerPoolBuilder {
    pub(crate) runtime: tokio::runtime::Handle,
    pub(crate) worker_name: Option<Arc<dyn Fn(usize) -> String + Send + Sync>>,
    pub(crate) panic_handler: Option<Arc<PanicHandler>>,
    pub(crate) num_workers: usize,
}

impl WorkerPoolBuilder {
    /// Initializes a new [`WorkerPoolBuilder`] with a single worker.
    ///
    /// Workers are spawned on the provided [`tokio::runtime::Handle`].
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self {
            runtime,
            worker_name: None,
            panic_handler: None,
            num_workers: 1,
        }
    }

    /// Specifies a naming convention for workers, used in log messages.
    ///
    /// The closure receives the worker's index.
    pub fn worker_name<F>(mut self, worker_name: F) -> Self
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        self.worker_name = Some(Arc::new(worker_name));
        self
    }

    /// Sets a panic handler for workers.
    ///
    /// If a job handler panics, its worker stops and the panic is passed to this handler instead
    /// of being propagated to the caller of [`WorkerPool::run`].
    pub fn panic_handler<F>(mut self, panic_handler: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(panic_handler));
        self
    }

    /// Sets the number of workers. Values below one are raised to one.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    /// Constructs a [`WorkerPool`] based on the configured settings.
    pub fn build(self) -> WorkerPool {
        WorkerPool::new(self)
    }
}
