//! Core observation types exchanged with the telemetry store
//!
//! An [`Observation`] is one named field reported by a device (or one of its
//! components) at a point in time. Everything the reconciliation engine reads
//! from the telemetry store arrives in this shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// A single scalar value as reported by a device
///
/// Serializes untagged so that it lands in a patch document as a plain JSON
/// number, string or boolean.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Integer(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

/// One measured or reported value from the telemetry store
///
/// `component == None` denotes the device's root node. The store does not
/// guarantee uniqueness: several observations may share
/// `(device, component, field)` with different times.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    /// Device that reported the value
    pub device: String,
    /// Sub-component of the device, None for the root
    pub component: Option<String>,
    /// Model type identifier of the device or component
    pub model: String,
    /// Field name, case-sensitive
    pub field: String,
    /// When the value was observed (bucket start for aggregated telemetry)
    pub time: Timestamp,
    /// The observed value
    pub value: Scalar,
}

impl Observation {
    pub fn new(
        device: impl Into<String>,
        component: Option<&str>,
        model: impl Into<String>,
        field: impl Into<String>,
        time: Timestamp,
        value: impl Into<Scalar>,
    ) -> Self {
        Self {
            device: device.into(),
            component: component.map(str::to_string),
            model: model.into(),
            field: field.into(),
            time,
            value: value.into(),
        }
    }

    /// Component key used for grouping: empty string for the root
    pub fn component_key(&self) -> &str {
        self.component.as_deref().unwrap_or("")
    }

    /// Selector identifying the time series this observation belongs to
    pub fn selector(&self) -> MetricSelector {
        MetricSelector {
            model: self.model.clone(),
            component: self.component.clone(),
            field: self.field.clone(),
        }
    }
}

/// Identifies one time series to fetch from the telemetry store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricSelector {
    pub model: String,
    pub component: Option<String>,
    pub field: String,
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.component {
            Some(component) => write!(f, "{}/{}.{}", self.model, component, self.field),
            None => write!(f, "{}/{}", self.model, self.field),
        }
    }
}
