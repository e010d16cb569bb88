//! Bounded rolling list of the most recent alerts.
//!
//! Snapshots carry at most one alert each; the dashboard shows only the
//! last few. Newest alerts are kept first and the oldest are evicted once
//! the feed is full.

use astratos_types::{Alert, AlertKind};

/// Rolling alert list, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertFeed {
    capacity: usize,
    alerts: Vec<Alert>,
}

impl AlertFeed {
    /// Create an empty feed keeping at most `capacity` alerts (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            alerts: Vec::with_capacity(capacity),
        }
    }

    /// Add one alert at the front, evicting the oldest if over capacity.
    pub fn push(&mut self, alert: Alert) {
        self.alerts.insert(0, alert);
        if self.alerts.len() > self.capacity {
            self.alerts.truncate(self.capacity);
        }
    }

    /// Add alerts in arrival order; the last one ends up newest.
    pub fn extend(&mut self, alerts: &[Alert]) {
        for alert in alerts {
            self.push(alert.clone());
        }
    }

    /// Alerts currently held, newest first.
    pub fn latest(&self) -> &[Alert] {
        &self.alerts
    }

    /// Held alerts of one kind, newest first.
    pub fn by_kind(&self, kind: AlertKind) -> Vec<&Alert> {
        self.alerts.iter().filter(|a| a.kind == kind).collect()
    }

    /// Maximum number of alerts held.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of alerts held.
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    /// Whether the feed holds no alerts.
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

impl Default for AlertFeed {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_ALERT_FEED_SIZE)
    }
}
