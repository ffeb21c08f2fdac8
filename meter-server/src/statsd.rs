use meter_statsd::CounterMetric;

/// Counter metrics used by the collector.
pub enum CollectorCounters {
    /// Number of samples merged into the store, after batches have been optimized.
    SamplesApplied,
    /// Number of requests rejected before reaching the store.
    ///
    /// This metric is tagged with:
    /// - `reason`: why the request was rejected.
    RequestsRejected,
}

impl CounterMetric for CollectorCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::SamplesApplied => "collector.samples.applied",
            Self::RequestsRejected => "collector.requests.rejected",
        }
    }
}
