use meter_statsd::CounterMetric;

/// Counter metrics for the agent.
pub enum AgentCounters {
    /// Incremented for every completed collection cycle.
    Collect,
    /// Incremented for every upload handed to the delivery workers.
    DeliveryAttempt,
    /// Incremented for every upload that could not be delivered, after retries.
    DeliveryFailed,
}

impl CounterMetric for AgentCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::Collect => "agent.collect",
            Self::DeliveryAttempt => "agent.delivery.attempt",
            Self::DeliveryFailed => "agent.delivery.failed",
        }
    }
}
