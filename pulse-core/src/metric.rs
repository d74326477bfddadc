//! Metric model and wire envelope.
//!
//! A metric is identified by its name and carries either an accumulating
//! counter or a last-write-wins gauge. The [`MetricEnvelope`] is the only
//! form that crosses process boundaries; the [`StoreSnapshot`] is the
//! on-disk form used by the data manager.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};

/// Closed set of metric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Integer metric whose write accumulates.
    Counter,
    /// Floating-point metric whose write replaces.
    Gauge,
}

impl MetricKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(PulseError::InvalidMetricKind(other.to_string())),
        }
    }
}

/// Tagged metric value.
///
/// The serde representation matches the snapshot file format:
/// `{"type":"counter","value":5}` / `{"type":"gauge","value":2.5}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
}

impl MetricValue {
    /// The kind tag carried by the enum discriminant.
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `{}` on f64 never pads with trailing zeros, which the plaintext
        // query endpoints rely on.
        match self {
            MetricValue::Counter(v) => write!(f, "{v}"),
            MetricValue::Gauge(v) => write!(f, "{v}"),
        }
    }
}

/// A stored metric. Equality within a store is by `id` alone.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn new(id: impl Into<String>, value: MetricValue) -> Self {
        Self { id: id.into(), value }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

/// Whole-store snapshot, keyed by metric id.
pub type StoreSnapshot = HashMap<String, MetricValue>;

/// Wire form of a single metric update or query.
///
/// Exactly one of `delta`/`value` is expected for updates and must match
/// `type`; queries carry neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricEnvelope {
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self { id: id.into(), kind: MetricKind::Counter, delta: Some(delta), value: None }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self { id: id.into(), kind: MetricKind::Gauge, delta: None, value: Some(value) }
    }

    /// Basic validation: the id must be non-empty. The kind is already
    /// enforced by the type system during deserialization.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(PulseError::EmptyMetricName);
        }

        Ok(())
    }

    /// Update validation: on top of [`validate`](Self::validate), the
    /// value slot matching the kind must be present.
    pub fn validate_update(&self) -> Result<()> {
        self.validate()?;

        match self.kind {
            MetricKind::Counter if self.delta.is_none() => Err(PulseError::MissingDelta),
            MetricKind::Gauge if self.value.is_none() => Err(PulseError::MissingValue),
            _ => Ok(()),
        }
    }

    /// Extract the typed value of an update envelope.
    pub fn to_value(&self) -> Result<MetricValue> {
        match self.kind {
            MetricKind::Counter => {
                self.delta.map(MetricValue::Counter).ok_or(PulseError::MissingDelta)
            }
            MetricKind::Gauge => self.value.map(MetricValue::Gauge).ok_or(PulseError::MissingValue),
        }
    }
}

/// Find an id that appears under both kinds within one batch. Such a
/// batch can never be applied without violating kind immutability, so
/// callers reject it up front.
pub fn find_kind_conflict(envelopes: &[MetricEnvelope]) -> Option<&str> {
    let counters: HashSet<&str> = envelopes
        .iter()
        .filter(|e| e.kind == MetricKind::Counter)
        .map(|e| e.id.as_str())
        .collect();

    envelopes
        .iter()
        .find(|e| e.kind == MetricKind::Gauge && counters.contains(e.id.as_str()))
        .map(|e| e.id.as_str())
}

impl From<&Metric> for MetricEnvelope {
    fn from(metric: &Metric) -> Self {
        match metric.value {
            MetricValue::Counter(delta) => MetricEnvelope::counter(metric.id.clone(), delta),
            MetricValue::Gauge(value) => MetricEnvelope::gauge(metric.id.clone(), value),
        }
    }
}
