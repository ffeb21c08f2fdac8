use std::error::Error;
use std::future::Future;
use std::io;
use std::time::Duration;

/// Delays between consecutive attempts of [`try_run`].
///
/// The schedule is shared by every call site: agent delivery, collector health checks and backend
/// initialization all retry at most `RETRY_DELAYS.len()` times.
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// The SQLSTATE class of transient connection exceptions.
const CONNECTION_EXCEPTION_CLASS: &str = "08";

/// Runs `f` and retries it according to [`RETRY_DELAYS`] while `is_retryable` returns `true`.
///
/// Errors for which `is_retryable` is `false` are returned immediately. Once the schedule is
/// exhausted, the error of the last attempt is returned. In total `f` is invoked at most
/// `1 + RETRY_DELAYS.len()` times.
///
/// # Example
///
/// ```
/// # async fn example() -> std::io::Result<()> {
/// let value = meter_common::try_run(
///     || async { Ok::<_, std::io::Error>(42) },
///     |error| meter_common::is_connection_refused(error),
/// )
/// .await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub async fn try_run<F, Fut, T, E, P>(mut f: F, is_retryable: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut delays = RETRY_DELAYS.iter();

    loop {
        let error = match f().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !is_retryable(&error) {
            return Err(error);
        }

        let Some(delay) = delays.next() else {
            return Err(error);
        };

        meter_log::debug!("retrying in {}s after transient error", delay.as_secs());
        tokio::time::sleep(*delay).await;
    }
}

/// Returns `true` if the error or any of its sources is a refused connection.
pub fn is_connection_refused(error: &(dyn Error + 'static)) -> bool {
    let mut source = Some(error);

    while let Some(error) = source {
        if let Some(io_error) = error.downcast_ref::<io::Error>()
            && io_error.kind() == io::ErrorKind::ConnectionRefused
        {
            return true;
        }
        source = error.source();
    }

    false
}

/// Returns `true` if the SQLSTATE code belongs to the connection exception class (`08xxx`).
pub fn is_connection_exception(code: &str) -> bool {
    code.starts_with(CONNECTION_EXCEPTION_CLASS)
}
