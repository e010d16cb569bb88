//! Snapshot generator: samples every configured metric within its bound.
//!
//! Generation is a total function over the entropy source. It never fails
//! and never retains anything between calls.

use astratos_types::{Alert, AlertKind, MetricBound, MetricValue, MetricsSnapshot};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::config::{PulseConfig, RangeTable};

/// A fixed alert message the generator can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertTemplate {
    /// Tone of the alert.
    pub kind: AlertKind,
    /// Message text.
    pub text: &'static str,
}

/// Catalog alerts are drawn from, uniformly.
pub const ALERT_CATALOG: [AlertTemplate; 7] = [
    AlertTemplate { kind: AlertKind::Info, text: "New user registered" },
    AlertTemplate { kind: AlertKind::Success, text: "Order completed successfully" },
    AlertTemplate { kind: AlertKind::Warning, text: "High server load detected" },
    AlertTemplate { kind: AlertKind::Info, text: "Inventory restocked" },
    AlertTemplate { kind: AlertKind::Success, text: "Payment processed" },
    AlertTemplate { kind: AlertKind::Warning, text: "Low stock alert triggered" },
    AlertTemplate { kind: AlertKind::Info, text: "New supplier added" },
];

/// Produces [`MetricsSnapshot`]s from a [`RangeTable`].
///
/// A [`RangeTable`] can only be obtained already checked, so every bound
/// the generator samples is non-empty and finite.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotGenerator {
    table: RangeTable,
    alert_chance: f64,
}

impl SnapshotGenerator {
    /// Create a generator. `alert_chance` is clamped into `[0, 1]`; NaN
    /// disables alerts.
    pub fn new(table: RangeTable, alert_chance: f64) -> Self {
        let alert_chance = if alert_chance.is_nan() {
            0.0
        } else {
            alert_chance.clamp(0.0, 1.0)
        };
        Self {
            table,
            alert_chance,
        }
    }

    /// Generator for the metric table and alert chance in `config`.
    pub fn from_config(config: &PulseConfig) -> Self {
        Self::new(config.metrics.clone(), config.broadcast.alert_chance)
    }

    /// The table this generator samples from.
    pub const fn table(&self) -> &RangeTable {
        &self.table
    }

    /// Probability that a snapshot carries an alert.
    pub const fn alert_chance(&self) -> f64 {
        self.alert_chance
    }

    /// Generate a snapshot stamped now, using the thread-local RNG.
    pub fn generate(&self) -> MetricsSnapshot {
        self.generate_with(&mut rand::rng(), Utc::now())
    }

    /// Generate a snapshot from the given entropy source and instant.
    pub fn generate_with<R: Rng>(&self, rng: &mut R, at: DateTime<Utc>) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot {
            timestamp: at,
            metrics: std::collections::BTreeMap::new(),
            alerts: Vec::new(),
        };
        for (path, bound) in self.table.iter() {
            snapshot.insert_metric(path, sample(bound, rng));
        }
        let raise = rng.random::<f64>() < self.alert_chance;
        if let Some(template) = raise.then(|| ALERT_CATALOG.choose(rng)).flatten() {
            snapshot
                .alerts
                .push(Alert::raised_at(template.kind, template.text, at));
        }
        snapshot
    }
}

/// Draw one value uniformly within `bound`.
fn sample<R: Rng>(bound: &MetricBound, rng: &mut R) -> MetricValue {
    match *bound {
        MetricBound::Integer { min, max } => MetricValue::Integer(rng.random_range(min..=max)),
        MetricBound::Decimal { min, max } => {
            let raw = rng.random_range(min..=max);
            MetricValue::Decimal(round_cents(raw).clamp(min, max))
        }
    }
}

/// Round to two decimal places.
fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
