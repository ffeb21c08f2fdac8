//! A high-level StatsD metric client built on cadence.
//!
//! This is how the agent and collector report on themselves. It is unrelated to the metric
//! samples the pipeline transports.
//!
//! ## Defining Metrics
//!
//! Metrics are declared by implementing [`CounterMetric`] or [`TimerMetric`] on an enum. The traits only provide a type safe name, so that a counter can
//! never be emitted as a timer.
//!
//! ## Initializing the Client
//!
//! Metrics can be used without initializing a client. In that case, the [`metric!`] macro is a
//! noop. To report to a StatsD server, call [`init`]:
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! meter_statsd::init(meter_statsd::MetricsConfig {
//!     prefix: "meter".to_owned(),
//!     host: "localhost:8125".to_owned(),
//!     buffer_size: None,
//!     default_tags: BTreeMap::new(),
//! })
//! .ok();
//! ```
//!
//! ## Macro Usage
//!
//! ```
//! use meter_statsd::{metric, CounterMetric};
//!
//! struct Requests;
//!
//! impl CounterMetric for Requests {
//!     fn name(&self) -> &'static str {
//!         "requests"
//!     }
//! }
//!
//! metric!(counter(Requests) += 1, route = "/updates/");
//! ```
use std::collections::BTreeMap;
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use cadence::{BufferedUdpMetricSink, Metric, MetricBuilder, QueuingMetricSink, StatsdClient};
pub use cadence::MetricError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Maximum number of metric events that can be queued before we start dropping them.
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

/// Client configuration object to store globally.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,
    /// Default tags to apply to every metric.
    pub default_tags: BTreeMap<String, String>,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Send a metric with the default tags defined on this `MetricsClient`.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (k, v) in &self.default_tags {
            metric = metric.with_tag(k, v);
        }

        if let Err(error) = metric.try_send() {
            meter_log::error!(
                error = &error as &dyn std::error::Error,
                maximum_capacity = METRICS_MAX_QUEUE_SIZE,
                "error sending a metric",
            );
        }
    }
}

/// Configuration for [`init`].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prefix which is prepended to all metric names.
    pub prefix: String,
    /// Host and port of the StatsD server.
    pub host: String,
    /// Size of the UDP send buffer. Uses cadence's default if not set.
    pub buffer_size: Option<usize>,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: std::cell::RefCell<Option<Arc<MetricsClient>>> = METRICS_CLIENT.read().clone().into();
}

/// Internal prelude for the macro
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// Set a new statsd client.
pub fn set_client(client: MetricsClient) {
    *METRICS_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Set a test client for the period of the called function (only affects the current thread).
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
        default_tags: Default::default(),
    };

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    drain(rx)
}

fn drain(rx: crossbeam_channel::Receiver<Vec<u8>>) -> Vec<String> {
    rx.try_iter()
        .map(|x| String::from_utf8_lossy(&x).into_owned())
        .collect()
}

/// Disable the client again.
pub fn disable() {
    *METRICS_CLIENT.write() = None;
}

/// Tell the metrics system to report to statsd.
pub fn init(config: MetricsConfig) -> Result<(), MetricError> {
    let addr = config.host.to_socket_addrs()?.next().ok_or_else(|| {
        MetricError::from(io::Error::new(
            io::ErrorKind::NotFound,
            "statsd host did not resolve",
        ))
    })?;
    meter_log::info!("reporting metrics to statsd at {addr}");

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;

    let udp_sink = match config.buffer_size {
        Some(size) => BufferedUdpMetricSink::with_capacity(addr, socket, size)?,
        None => BufferedUdpMetricSink::from(addr, socket)?,
    };
    let queuing_sink = QueuingMetricSink::with_capacity(udp_sink, METRICS_MAX_QUEUE_SIZE);

    set_client(MetricsClient {
        statsd_client: StatsdClient::from_sink(&config.prefix, queuing_sink),
        default_tags: config.default_tags,
    });

    Ok(())
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked. For the most part the [`metric!`]
/// macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// A metric for capturing timings.
///
/// Timings are reported in milliseconds.
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// Counters are simple values incremented or decremented by a client.
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // timed block
    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let now = std::time::Instant::now();
        let rv = {$block};
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.distribution_with_tags(
                    &$crate::TimerMetric::name(&$id),
                    now.elapsed().as_nanos() as f64 / 1e6,
                )
                $(.with_tag(stringify!($($k).*), $v))*
            )
        });
        rv
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cadence::{NopMetricSink, StatsdClient};

    use super::*;

    struct TestCounter;

    impl CounterMetric for TestCounter {
        fn name(&self) -> &'static str {
            "requests"
        }
    }

    struct TestTimer;

    impl TimerMetric for TestTimer {
        fn name(&self) -> &'static str {
            "flush"
        }
    }

    #[test]
    fn test_capturing_client() {
        let captures = with_capturing_test_client(|| {
            metric!(counter(TestCounter) += 2, route = "/updates/");
            metric!(counter(TestCounter) += 1);
        });

        assert_eq!(captures, ["requests:2|c|#route:/updates/", "requests:1|c"])
    }

    #[test]
    fn test_zero_counter_is_skipped() {
        let captures = with_capturing_test_client(|| {
            metric!(counter(TestCounter) += 0);
        });
        assert!(captures.is_empty());
    }

    #[test]
    fn test_timer_tags() {
        let captures = with_capturing_test_client(|| {
            metric!(timer(TestTimer), store = "file", {
                std::thread::sleep(Duration::from_millis(1));
            });
        });
        assert_eq!(captures.len(), 1);
        assert!(captures[0].starts_with("flush:"));
        assert!(captures[0].ends_with("|d|#store:file"));
    }

    #[test]
    fn test_timed_block_returns_value() {
        let mut value = 0;
        let captures = with_capturing_test_client(|| {
            value = metric!(timer(TestTimer), { 40 + 2 });
        });
        assert_eq!(value, 42);
        assert_eq!(captures.len(), 1);
        assert!(captures[0].starts_with("flush:"));
    }

    #[test]
    fn current_client_is_global_client() {
        let client1 = with_client(|c| format!("{c:?}"));
        set_client(MetricsClient {
            statsd_client: StatsdClient::from_sink("", NopMetricSink),
            default_tags: Default::default(),
        });
        let client2 = with_client(|c| format!("{c:?}"));

        assert_ne!(client1, client2);
        disable();
    }
}
