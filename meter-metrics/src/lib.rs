//! Metric samples as transported from the agent to the collector.
//!
//! A [`MetricSample`] is a named value of one of two kinds:
//!
//!  - [Gauges](MetricValue::Gauge) carry an absolute `f64` value. A newer gauge replaces an older
//!    one.
//!  - [Counters](MetricValue::Counter) carry an `i64` delta. Deltas for the same name are summed.
//!
//! # Wire Format
//!
//! On the wire, samples are JSON objects with the name in `id`, the kind in `type` and exactly one
//! of `delta` (counters) or `value` (gauges):
//!
//! ```json
//! [
//!   {"id": "PollCount", "type": "counter", "delta": 5},
//!   {"id": "HeapAlloc", "type": "gauge", "value": 1934528}
//! ]
//! ```
//!
//! Samples whose declared type does not match the populated field are rejected with a
//! [`MalformedMetricError`]. The same applies to the plain text form used in request paths, see
//! [`MetricSample::parse_path`].
//!
//! # Batches
//!
//! Before a batch is sent or applied to a store, it is reduced with [`optimize`] so that every
//! name occurs at most once.
#![warn(missing_docs)]

mod batch;
mod protocol;
mod sample;

pub use self::batch::*;
pub use self::protocol::*;
pub use self::sample::*;
