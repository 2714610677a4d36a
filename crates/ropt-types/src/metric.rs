//! Performance samples reported by the edge pipeline and the backend.
//!
//! A sample is a small bag of named numbers (`fps`, `latency_ms`,
//! `solve_ms`, ...) from one source at one instant, optionally filed under a
//! run so it can be replayed next to that run's events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{MetricId, RunId};

/// Reasons a submitted sample is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidMetric {
    /// `source` was empty or whitespace.
    #[error("source must not be blank")]
    BlankSource,

    /// No values were given.
    #[error("values must not be empty")]
    NoValues,

    /// A value name was blank.
    #[error("value names must not be blank")]
    BlankName,

    /// A value was NaN or infinite.
    #[error("value {0} is not a finite number")]
    NotFinite(String),
}

/// A sample as submitted to `POST /metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MetricIn {
    /// Reporter, e.g. `"edge_cam_2"` or `"solver"`.
    pub source: String,
    /// Sample time in Unix milliseconds (defaults to now).
    #[serde(default = "crate::time::now_ms")]
    pub ts_ms: u64,
    /// Run to file the sample under, if any.
    #[serde(default)]
    pub run_id: Option<RunId>,
    /// Named measurements.
    pub values: BTreeMap<String, f64>,
}

impl MetricIn {
    /// A sample from `source` at `ts_ms` with no values yet.
    pub fn new(source: &str, ts_ms: u64) -> Self {
        Self {
            source: source.to_owned(),
            ts_ms,
            run_id: None,
            values: BTreeMap::new(),
        }
    }

    /// Add one named value.
    #[must_use]
    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_owned(), value);
        self
    }

    /// Reject blank names and non-finite numbers.
    pub fn validate(&self) -> Result<(), InvalidMetric> {
        if self.source.trim().is_empty() {
            return Err(InvalidMetric::BlankSource);
        }
        if self.values.is_empty() {
            return Err(InvalidMetric::NoValues);
        }
        for (name, value) in &self.values {
            if name.trim().is_empty() {
                return Err(InvalidMetric::BlankName);
            }
            if !value.is_finite() {
                return Err(InvalidMetric::NotFinite(name.clone()));
            }
        }
        Ok(())
    }
}

/// A stored sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MetricRecord {
    /// Storage identifier.
    pub id: MetricId,
    /// Reporter.
    pub source: String,
    /// Sample time in Unix milliseconds.
    pub ts_ms: u64,
    /// Run the sample was filed under.
    pub run_id: Option<RunId>,
    /// Named measurements.
    pub values: BTreeMap<String, f64>,
    /// Time the backend accepted the sample in Unix milliseconds.
    pub received_ms: u64,
}

impl MetricRecord {
    /// Seal a validated sample.
    pub fn from_submitted(metric: MetricIn, received_ms: u64) -> Self {
        Self {
            id: MetricId::new(),
            source: metric.source,
            ts_ms: metric.ts_ms,
            run_id: metric.run_id,
            values: metric.values,
            received_ms,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sample_defaults_time_and_run() {
        let metric: MetricIn =
            serde_json::from_str(r#"{"source":"edge_cam_2","values":{"fps":29.5}}"#).unwrap();
        assert!(metric.ts_ms > 0);
        assert_eq!(metric.run_id, None);
        assert!(metric.validate().is_ok());
    }

    #[test]
    fn rejects_unusable_samples() {
        assert_eq!(
            MetricIn::new(" ", 1).with_value("fps", 1.0).validate(),
            Err(InvalidMetric::BlankSource)
        );
        assert_eq!(MetricIn::new("edge", 1).validate(), Err(InvalidMetric::NoValues));
        assert_eq!(
            MetricIn::new("edge", 1).with_value("", 1.0).validate(),
            Err(InvalidMetric::BlankName)
        );
        assert_eq!(
            MetricIn::new("edge", 1).with_value("latency_ms", f64::NAN).validate(),
            Err(InvalidMetric::NotFinite("latency_ms".to_owned()))
        );
    }
}
