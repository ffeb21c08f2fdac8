use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Shutdown request message sent by the [`Controller`] to subscribed services.
///
/// A handler has to ensure that it doesn't take longer than `timeout` to resolve the future.
/// Ideally, open work is persisted or finished in an orderly manner but no new requests are
/// accepted anymore.
///
/// The controller ensures that no other service gets to run after the timeout has elapsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

/// Receives the [`Shutdown`] broadcast of a [`Controller`].
#[derive(Clone, Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Waits for the shutdown signal.
    ///
    /// Resolves immediately if the shutdown was already initiated. If the controller is dropped
    /// without initiating a shutdown, this resolves to a forced shutdown.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = *self.0.borrow_and_update() {
                return shutdown;
            }

            if self.0.changed().await.is_err() {
                return Shutdown { timeout: None };
            }
        }
    }

    /// Returns the shutdown request, if a shutdown has been initiated.
    pub fn get(&self) -> Option<Shutdown> {
        *self.0.borrow()
    }
}

/// Service to start and gracefully stop the system.
///
/// SIGINT and SIGQUIT request an immediate shutdown. SIGTERM requests a graceful shutdown bounded
/// by the configured timeout.
#[derive(Debug)]
pub struct Controller {
    timeout: Duration,
    sender: Arc<watch::Sender<Option<Shutdown>>>,
}

impl Controller {
    /// Creates a controller that only shuts down through [`shutdown`](Self::shutdown).
    pub fn new(timeout: Duration) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            timeout,
            sender: Arc::new(sender),
        }
    }

    /// Creates a controller and starts listening for process signals.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(timeout: Duration) -> Self {
        let controller = Self::new(timeout);
        tokio::spawn(listen(timeout, Arc::clone(&controller.sender)));
        controller
    }

    /// Returns a handle to wait for the shutdown signal.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.sender.subscribe())
    }

    /// Returns the configured graceful shutdown timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Manually initiates the shutdown process of the system.
    ///
    /// Only the first shutdown request takes effect.
    pub fn shutdown(&self, timeout: Option<Duration>) {
        initiate(&self.sender, timeout);
    }
}

fn initiate(sender: &watch::Sender<Option<Shutdown>>, timeout: Option<Duration>) {
    sender.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(Shutdown { timeout });
        true
    });
}

#[cfg(unix)]
async fn listen(timeout: Duration, sender: Arc<watch::Sender<Option<Shutdown>>>) {
    use tokio::signal::unix::{SignalKind, signal};

    let signals = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::quit()),
        signal(SignalKind::terminate()),
    );

    let (mut sig_int, mut sig_quit, mut sig_term) = match signals {
        (Ok(int), Ok(quit), Ok(term)) => (int, quit, term),
        (Err(error), _, _) | (_, Err(error), _) | (_, _, Err(error)) => {
            meter_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to register signal handlers"
            );
            return;
        }
    };

    tokio::select! {
        _ = sig_int.recv() => {
            meter_log::info!("SIGINT received, exiting");
            initiate(&sender, None);
        }
        _ = sig_quit.recv() => {
            meter_log::info!("SIGQUIT received, exiting");
            initiate(&sender, None);
        }
        _ = sig_term.recv() => {
            meter_log::info!("SIGTERM received, stopping in {}s", timeout.as_secs());
            initiate(&sender, Some(timeout));
        }
    }
}

#[cfg(not(unix))]
async fn listen(_timeout: Duration, sender: Arc<watch::Sender<Option<Shutdown>>>) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        meter_log::error!(
            error = &error as &dyn std::error::Error,
            "failed to register signal handlers"
        );
        return;
    }

    meter_log::info!("SIGINT received, exiting");
    initiate(&sender, None);
}
