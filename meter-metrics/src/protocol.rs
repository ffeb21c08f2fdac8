use serde::{Deserialize, Serialize};

use crate::sample::{CounterType, GaugeType, MetricKind, MetricSample, MetricValue};

/// A sample that violates the shape rules of the metric protocol.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MalformedMetricError {
    /// The metric name is empty.
    #[error("metric name must not be empty")]
    EmptyName,
    /// The metric type is neither `gauge` nor `counter`.
    #[error("unknown metric type `{0}`")]
    UnknownKind(String),
    /// Neither `delta` nor `value` is set.
    #[error("{kind} `{name}` carries neither delta nor value")]
    MissingValue {
        /// The name of the metric.
        name: String,
        /// The declared kind.
        kind: MetricKind,
    },
    /// Both `delta` and `value` are set.
    #[error("`{0}` carries both delta and value")]
    AmbiguousValue(String),
    /// The populated field does not belong to the declared kind.
    #[error("{kind} `{name}` carries the value of another metric type")]
    KindMismatch {
        /// The name of the metric.
        name: String,
        /// The declared kind.
        kind: MetricKind,
    },
    /// The value could not be parsed as a number of the declared kind.
    #[error("invalid {kind} value `{value}`")]
    InvalidValue {
        /// The declared kind.
        kind: MetricKind,
        /// The raw value.
        value: String,
    },
    /// A gauge value is NaN or infinite.
    #[error("gauge `{0}` is not a finite number")]
    NonFinite(String),
}

/// The JSON representation of a [`MetricSample`].
///
/// This type is permissive so that shape violations surface as [`MalformedMetricError`] rather
/// than generic deserialization errors. Convert with `MetricSample::try_from`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct WireMetric {
    /// Name of the metric.
    pub id: String,
    /// Declared kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Counter delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<CounterType>,
    /// Gauge value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<GaugeType>,
}

impl TryFrom<WireMetric> for MetricSample {
    type Error = MalformedMetricError;

    fn try_from(wire: WireMetric) -> Result<Self, Self::Error> {
        let kind: MetricKind = wire.kind.parse()?;
        let name = wire.id;

        let value = match (kind, wire.delta, wire.value) {
            (_, Some(_), Some(_)) => return Err(MalformedMetricError::AmbiguousValue(name)),
            (_, None, None) => return Err(MalformedMetricError::MissingValue { name, kind }),
            (MetricKind::Counter, Some(delta), None) => MetricValue::Counter(delta),
            (MetricKind::Gauge, None, Some(value)) => MetricValue::Gauge(value),
            (kind, _, _) => return Err(MalformedMetricError::KindMismatch { name, kind }),
        };

        MetricSample::new(name, value)
    }
}

impl From<MetricSample> for WireMetric {
    fn from(sample: MetricSample) -> Self {
        let kind = sample.kind().as_str().to_owned();
        let (id, value) = sample.into_parts();

        match value {
            MetricValue::Gauge(value) => WireMetric {
                id,
                kind,
                delta: None,
                value: Some(value),
            },
            MetricValue::Counter(delta) => WireMetric {
                id,
                kind,
                delta: Some(delta),
                value: None,
            },
        }
    }
}

/// A read-back request for a single metric, `{"id": ..., "type": ...}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct MetricQuery {
    /// Name of the metric.
    pub id: String,
    /// Expected kind of the metric.
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

impl MetricSample {
    /// Parses a sample from the segments of a plain update path,
    /// `/update/{kind}/{name}/{value}`.
    ///
    /// Counter values must be integers, gauge values any finite float.
    pub fn parse_path(kind: &str, name: &str, value: &str) -> Result<Self, MalformedMetricError> {
        let kind: MetricKind = kind.parse()?;
        let invalid = || MalformedMetricError::InvalidValue {
            kind,
            value: value.to_owned(),
        };

        let value = match kind {
            MetricKind::Gauge => MetricValue::Gauge(value.parse().map_err(|_| invalid())?),
            MetricKind::Counter => MetricValue::Counter(value.parse().map_err(|_| invalid())?),
        };

        MetricSample::new(name, value)
    }
}
