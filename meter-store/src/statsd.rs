use meter_statsd::{CounterMetric, TimerMetric};

/// Counter metrics for the storage engine.
pub enum StoreCounters {
    /// Incremented every time a database operation is retried after a transient error.
    Retry,
}

impl CounterMetric for StoreCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::Retry => "store.retry",
        }
    }
}

/// Timer metrics for the storage engine.
pub enum StoreTimers {
    /// Time spent writing a full snapshot to disk.
    SnapshotDuration,
}

impl TimerMetric for StoreTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::SnapshotDuration => "collector.snapshot.duration",
        }
    }
}
