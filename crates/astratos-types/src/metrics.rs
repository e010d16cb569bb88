//! Metric bounds, sampled values, and the snapshot pushed on every tick.
//!
//! A [`MetricBound`] is static configuration: the inclusive range a metric
//! may take. A [`MetricsSnapshot`] is what the generator produces from a
//! table of bounds. Metric names containing a dot (`systemHealth.cpu`)
//! are rendered as nested objects inside [`MetricsSnapshot::metrics`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::alert::Alert;

/// Separator between a group name and a field name in a metric path.
pub const PATH_SEPARATOR: char = '.';

/// Inclusive range for one metric.
///
/// The variant decides how values are sampled: integers are drawn over
/// the whole integer range, decimals over the real range and then kept
/// to two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum MetricBound {
    /// Whole-number metric (counts, milliseconds).
    Integer {
        /// Smallest value the metric may take.
        min: i64,
        /// Largest value the metric may take.
        max: i64,
    },
    /// Two-decimal metric (money, percentages).
    Decimal {
        /// Smallest value the metric may take.
        min: f64,
        /// Largest value the metric may take.
        max: f64,
    },
}

impl MetricBound {
    /// Integer bound over `min..=max`.
    pub const fn integer(min: i64, max: i64) -> Self {
        Self::Integer { min, max }
    }

    /// Decimal bound over `min..=max`.
    pub const fn decimal(min: f64, max: f64) -> Self {
        Self::Decimal { min, max }
    }

    /// Whether the bound is usable: `min <= max` and both ends finite.
    pub fn is_valid(&self) -> bool {
        match *self {
            Self::Integer { min, max } => min <= max,
            Self::Decimal { min, max } => min.is_finite() && max.is_finite() && min <= max,
        }
    }

    /// Whether `value` lies inside this bound (inclusive on both ends).
    ///
    /// An integer value is accepted by a decimal bound; a decimal value is
    /// never accepted by an integer bound, and groups are never in range.
    #[allow(clippy::cast_precision_loss)]
    pub fn contains(&self, value: &MetricValue) -> bool {
        match (*self, value) {
            (Self::Integer { min, max }, MetricValue::Integer(v)) => (min..=max).contains(v),
            (Self::Decimal { min, max }, MetricValue::Decimal(v)) => (min..=max).contains(v),
            (Self::Decimal { min, max }, MetricValue::Integer(v)) => {
                (min..=max).contains(&(*v as f64))
            }
            _ => false,
        }
    }
}

/// One sampled metric value, or a group of them.
///
/// Serialized untagged so the wire format carries plain JSON numbers and
/// objects, e.g. `{"incoming": 42, "systemHealth": {"cpu": 51.3}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum MetricValue {
    /// Whole-number value.
    Integer(i64),
    /// Two-decimal value.
    Decimal(f64),
    /// Nested group of values keyed by field name.
    Group(BTreeMap<String, MetricValue>),
}

impl MetricValue {
    /// Numeric view of a leaf value. Returns `None` for groups.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Decimal(v) => Some(*v),
            Self::Group(_) => None,
        }
    }

    /// Look up a child by field name. Returns `None` for leaves.
    pub fn field(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Group(fields) => fields.get(name),
            Self::Integer(_) | Self::Decimal(_) => None,
        }
    }
}

/// One generated bundle of simulated metrics plus zero or one alert.
///
/// Created fresh on every scheduler tick and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MetricsSnapshot {
    /// Instant the snapshot was generated.
    pub timestamp: DateTime<Utc>,
    /// Sampled values keyed by metric name; dotted names become groups.
    pub metrics: BTreeMap<String, MetricValue>,
    /// Alerts raised alongside this snapshot (at most one).
    pub alerts: Vec<Alert>,
}

impl MetricsSnapshot {
    /// Resolve a metric by its configured path (`inventory`,
    /// `systemHealth.cpu`).
    pub fn metric(&self, path: &str) -> Option<&MetricValue> {
        let mut segments = path.split(PATH_SEPARATOR);
        let first = segments.next()?;
        let mut current = self.metrics.get(first)?;
        for segment in segments {
            current = current.field(segment)?;
        }
        Some(current)
    }

    /// Insert a value at `path`, creating intermediate groups as needed.
    ///
    /// If a leaf already occupies an intermediate segment it is replaced
    /// by a group.
    pub fn insert_metric(&mut self, path: &str, value: MetricValue) {
        insert_path(&mut self.metrics, path, value);
    }
}

fn insert_path(map: &mut BTreeMap<String, MetricValue>, path: &str, value: MetricValue) {
    match path.split_once(PATH_SEPARATOR) {
        None => {
            map.insert(path.to_owned(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_owned())
                .or_insert_with(|| MetricValue::Group(BTreeMap::new()));
            if !matches!(entry, MetricValue::Group(_)) {
                *entry = MetricValue::Group(BTreeMap::new());
            }
            if let MetricValue::Group(children) = entry {
                insert_path(children, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            metrics: BTreeMap::new(),
            alerts: Vec::new(),
        }
    }

    #[test]
    fn bound_validity() {
        assert!(MetricBound::integer(10, 10).is_valid());
        assert!(!MetricBound::integer(11, 10).is_valid());
        assert!(MetricBound::decimal(20.0, 85.0).is_valid());
        assert!(!MetricBound::decimal(f64::NAN, 85.0).is_valid());
        assert!(!MetricBound::decimal(90.0, 85.0).is_valid());
    }

    #[test]
    fn bound_contains_is_inclusive() {
        let bound = MetricBound::integer(50, 300);
        assert!(bound.contains(&MetricValue::Integer(50)));
        assert!(bound.contains(&MetricValue::Integer(300)));
        assert!(!bound.contains(&MetricValue::Integer(301)));
        assert!(!bound.contains(&MetricValue::Decimal(100.0)));

        let pct = MetricBound::decimal(20.0, 85.0);
        assert!(pct.contains(&MetricValue::Decimal(85.0)));
        assert!(pct.contains(&MetricValue::Integer(20)));
        assert!(!pct.contains(&MetricValue::Decimal(85.01)));
    }

    #[test]
    fn bound_parses_from_tagged_json() {
        let bound: MetricBound =
            serde_json::from_str(r#"{"kind":"decimal","min":1000.0,"max":10000.0}"#)
                .unwrap_or(MetricBound::integer(0, 0));
        assert_eq!(bound, MetricBound::decimal(1000.0, 10000.0));
    }

    #[test]
    fn dotted_paths_become_groups() {
        let mut snap = empty_snapshot();
        snap.insert_metric("inventory", MetricValue::Integer(4800));
        snap.insert_metric("systemHealth.cpu", MetricValue::Decimal(51.25));
        snap.insert_metric("systemHealth.responseTime", MetricValue::Integer(120));

        assert_eq!(snap.metric("inventory"), Some(&MetricValue::Integer(4800)));
        assert_eq!(
            snap.metric("systemHealth.responseTime"),
            Some(&MetricValue::Integer(120))
        );
        assert!(snap.metric("systemHealth.disk").is_none());

        let json = serde_json::to_value(&snap).unwrap_or_default();
        assert_eq!(json["metrics"]["systemHealth"]["cpu"], 51.25);
        assert_eq!(json["metrics"]["inventory"], 4800);
        assert!(json["alerts"].as_array().is_some_and(Vec::is_empty));
    }

    #[test]
    fn leaf_is_replaced_by_group_on_conflict() {
        let mut snap = empty_snapshot();
        snap.insert_metric("health", MetricValue::Integer(1));
        snap.insert_metric("health.cpu", MetricValue::Integer(2));
        assert_eq!(snap.metric("health.cpu"), Some(&MetricValue::Integer(2)));
    }
}
