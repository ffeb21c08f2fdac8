use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::{MalformedMetricError, WireMetric};

/// Type used for counter deltas.
pub type CounterType = i64;

/// Type used for gauge values.
pub type GaugeType = f64;

/// The kind of a [`MetricValue`], determining how it merges with a previous value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Stores the last reported value.
    Gauge,
    /// Sums up all reported deltas.
    Counter,
}

impl MetricKind {
    /// Returns the name of this kind as used in request paths and JSON payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MalformedMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(Self::Gauge),
            "counter" => Ok(Self::Counter),
            other => Err(MalformedMetricError::UnknownKind(other.to_owned())),
        }
    }
}

/// The typed value of a [`MetricSample`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// An absolute value. See [`MetricKind::Gauge`].
    Gauge(GaugeType),
    /// A delta to add to the stored value. See [`MetricKind::Counter`].
    Counter(CounterType),
}

impl MetricValue {
    /// Returns the kind of this value.
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
        }
    }

    /// Merges an incoming value into this one.
    ///
    /// Two counters add up. In every other case the incoming value replaces the current one,
    /// including when the kinds differ.
    pub fn merge(self, incoming: Self) -> Self {
        match (self, incoming) {
            (Self::Counter(current), Self::Counter(delta)) => {
                Self::Counter(current.saturating_add(delta))
            }
            (_, incoming) => incoming,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gauge(value) => value.fmt(f),
            Self::Counter(delta) => delta.fmt(f),
        }
    }
}

/// A single named metric value.
///
/// Samples are immutable. Merging creates a new sample, see [`MetricSample::merge`].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "WireMetric", into = "WireMetric")]
pub struct MetricSample {
    name: String,
    value: MetricValue,
}

impl MetricSample {
    /// Creates a new sample from a name and a value.
    ///
    /// Returns an error if the name is empty or a gauge value is not finite.
    pub fn new(name: impl Into<String>, value: MetricValue) -> Result<Self, MalformedMetricError> {
        let name = name.into();
        if name.is_empty() {
            return Err(MalformedMetricError::EmptyName);
        }
        if let MetricValue::Gauge(value) = value
            && !value.is_finite()
        {
            return Err(MalformedMetricError::NonFinite(name));
        }
        Ok(Self { name, value })
    }

    /// Creates a gauge sample.
    pub fn gauge(name: impl Into<String>, value: GaugeType) -> Result<Self, MalformedMetricError> {
        Self::new(name, MetricValue::Gauge(value))
    }

    /// Creates a counter sample.
    pub fn counter(
        name: impl Into<String>,
        delta: CounterType,
    ) -> Result<Self, MalformedMetricError> {
        Self::new(name, MetricValue::Counter(delta))
    }

    /// The unique name of this metric.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The typed value of this sample.
    pub fn value(&self) -> MetricValue {
        self.value
    }

    /// The kind of this sample.
    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Returns a sample with the incoming value merged into this one.
    ///
    /// The name of `self` is kept. See [`MetricValue::merge`] for the merge rules.
    pub fn merge(&self, incoming: &MetricSample) -> MetricSample {
        MetricSample {
            name: self.name.clone(),
            value: self.value.merge(incoming.value),
        }
    }

    /// Splits the sample into its name and value.
    pub fn into_parts(self) -> (String, MetricValue) {
        (self.name, self.value)
    }
}

impl fmt::Display for MetricSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind(), self.name, self.value)
    }
}
