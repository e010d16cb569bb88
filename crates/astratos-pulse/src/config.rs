//! Configuration loading and typed config structures for the pulse server.
//!
//! The optional configuration file is `astratos.yaml` (or whatever
//! `ASTRATOS_CONFIG` points at). Every section has defaults, so an empty
//! file, or no file at all, yields the canonical metric set broadcast on a
//! randomized 1.5-3 second cadence.
//!
//! The [`RangeTable`] is leaf data: changing a metric's realistic range is
//! a one-line edit in the `metrics` section, never a code change.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use astratos_types::{MetricBound, PATH_SEPARATOR};
use serde::Deserialize;

use crate::cadence::Cadence;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "ASTRATOS_CONFIG";

/// File looked up in the working directory when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "astratos.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value for env var {name}: {reason}")]
    Env {
        /// Name of the offending variable.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level pulse configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PulseConfig {
    /// Where the HTTP/WebSocket server listens.
    #[serde(default)]
    pub server: ServerSection,

    /// Broadcast cadence and alert probability.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Metric range table. Replaces the built-in table wholesale when set.
    #[serde(default)]
    pub metrics: RangeTable,
}

impl PulseConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment overrides are applied and the result is validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Env`]/[`ConfigError::Invalid`] if the result is
    /// unusable.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string (no env overrides, no
    /// validation).
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as an empty map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Resolve the config file and load it, falling back to defaults.
    ///
    /// Uses `$ASTRATOS_CONFIG` if set (the file must exist), otherwise
    /// `./astratos.yaml` if present, otherwise built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            return Self::from_file(default_path);
        }
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    ///
    /// - `HOST` overrides `server.host`
    /// - `PORT` overrides `server.port`
    /// - `ALERT_CHANCE` overrides `broadcast.alert_chance`
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|e| ConfigError::Env {
                name: "PORT".to_owned(),
                reason: format!("{e}"),
            })?;
        }
        if let Some(chance) = lookup("ALERT_CHANCE") {
            self.broadcast.alert_chance = chance.parse().map_err(|e| ConfigError::Env {
                name: "ALERT_CHANCE".to_owned(),
                reason: format!("{e}"),
            })?;
        }
        Ok(())
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broadcast.validate()?;
        self.metrics.validate()
    }
}

/// Server bind settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// The host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// The TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Broadcast cadence and alert settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BroadcastConfig {
    /// Lower bound of the delay between ticks, in milliseconds.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Upper bound of the delay between ticks, in milliseconds. Equal to
    /// `min_interval_ms` for a fixed cadence.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Probability in `[0, 1]` that a snapshot carries an alert.
    #[serde(default = "default_alert_chance")]
    pub alert_chance: f64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            alert_chance: default_alert_chance(),
        }
    }
}

impl BroadcastConfig {
    /// Cadence described by the interval bounds.
    pub const fn cadence(&self) -> Cadence {
        Cadence::between(
            Duration::from_millis(self.min_interval_ms),
            Duration::from_millis(self.max_interval_ms),
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "broadcast.min_interval_ms must be at least 1".to_owned(),
            });
        }
        if self.min_interval_ms > self.max_interval_ms {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "broadcast.min_interval_ms ({}) exceeds max_interval_ms ({})",
                    self.min_interval_ms, self.max_interval_ms
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.alert_chance) {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "broadcast.alert_chance must be within [0, 1], got {}",
                    self.alert_chance
                ),
            });
        }
        Ok(())
    }
}

/// Static mapping of metric path to its inclusive bound.
///
/// Paths may be dotted (`systemHealth.cpu`) to produce nested groups. A
/// table is checked whenever it is built or deserialized, so every table
/// in hand can be sampled: it is non-empty, every bound is usable, and no
/// path is both a metric and the group of another metric.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, MetricBound>")]
pub struct RangeTable(BTreeMap<String, MetricBound>);

impl RangeTable {
    /// Build a table from `(path, bound)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the table is empty, a path has an
    /// empty segment, a bound is inverted or not finite, or a metric path is
    /// also the prefix of a grouped path (`health` and `health.cpu`).
    pub fn try_new<I, S>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, MetricBound)>,
        S: Into<String>,
    {
        Self::try_from(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    /// The canonical inventory-dashboard metric set.
    pub fn canonical() -> Self {
        Self(
            [
                ("incoming", MetricBound::integer(20, 120)),
                ("outgoing", MetricBound::integer(15, 110)),
                ("notDetected", MetricBound::integer(0, 12)),
                ("inventory", MetricBound::integer(4500, 5200)),
                ("sales", MetricBound::decimal(1000.0, 10000.0)),
                ("suppliers", MetricBound::integer(40, 48)),
                ("anomalies", MetricBound::integer(0, 9)),
                ("forecasts", MetricBound::integer(10, 30)),
                ("audit", MetricBound::integer(100, 400)),
                ("systemHealth.cpu", MetricBound::decimal(20.0, 85.0)),
                ("systemHealth.memory", MetricBound::decimal(30.0, 75.0)),
                ("systemHealth.responseTime", MetricBound::integer(50, 300)),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect(),
        )
    }

    /// Bound configured for `path`, if any.
    pub fn get(&self, path: &str) -> Option<&MetricBound> {
        self.0.get(path)
    }

    /// Iterate `(path, bound)` in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricBound)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of configured metrics.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no metrics are configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "metrics table is empty".to_owned(),
            });
        }
        for (path, bound) in self.iter() {
            if path.is_empty() || path.split(PATH_SEPARATOR).any(str::is_empty) {
                return Err(ConfigError::Invalid {
                    reason: format!("metric path {path:?} has an empty segment"),
                });
            }
            if !bound.is_valid() {
                return Err(ConfigError::Invalid {
                    reason: format!("metric {path} has an invalid bound: {bound:?}"),
                });
            }
            let group = path
                .match_indices(PATH_SEPARATOR)
                .filter_map(|(at, _)| path.get(..at))
                .find(|prefix| self.0.contains_key(*prefix));
            if let Some(group) = group {
                return Err(ConfigError::Invalid {
                    reason: format!("metric {group} is also the group of {path}"),
                });
            }
        }
        Ok(())
    }
}

impl TryFrom<BTreeMap<String, MetricBound>> for RangeTable {
    type Error = ConfigError;

    fn try_from(entries: BTreeMap<String, MetricBound>) -> Result<Self, Self::Error> {
        let table = Self(entries);
        table.validate()?;
        Ok(table)
    }
}

impl Default for RangeTable {
    fn default() -> Self {
        Self::canonical()
    }
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    5000
}

const fn default_min_interval_ms() -> u64 {
    1500
}

const fn default_max_interval_ms() -> u64 {
    3000
}

const fn default_alert_chance() -> f64 {
    0.3
}
