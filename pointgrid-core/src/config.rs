//! View configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables of one view. Every field has a default, so `{}` is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Datasets with more rows than this skip formula evaluation.
    /// `None` disables the limit.
    pub formula_row_ceiling: Option<usize>,
    /// Datasets with more rows than this skip filter-range computation.
    pub filter_row_ceiling: Option<usize>,
    /// Bins per filter histogram.
    pub histogram_buckets: usize,
    pub pulse_interval_ms: u64,
    pub pulse_initial_delay_ms: u64,
    /// Back-off before a failed pass is retried.
    pub retry_delay_ms: u64,
    pub worker_thread_name: String,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            formula_row_ceiling: Some(5000),
            filter_row_ceiling: None,
            histogram_buckets: 15,
            pulse_interval_ms: 2000,
            pulse_initial_delay_ms: 4000,
            retry_delay_ms: 250,
            worker_thread_name: "pointgrid-recompute".to_string(),
        }
    }
}

impl ViewConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.histogram_buckets == 0 {
            return Err(ConfigError::Invalid("histogram_buckets must be positive".into()));
        }
        if self.pulse_interval_ms == 0 {
            return Err(ConfigError::Invalid("pulse_interval_ms must be positive".into()));
        }
        if self.worker_thread_name.is_empty() {
            return Err(ConfigError::Invalid("worker_thread_name must not be empty".into()));
        }
        Ok(())
    }

    pub fn pulse_interval(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms)
    }

    pub fn pulse_initial_delay(&self) -> Duration {
        Duration::from_millis(self.pulse_initial_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ViewConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.formula_row_ceiling, Some(5000));
        assert_eq!(config.pulse_interval(), Duration::from_secs(2));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ViewConfig::from_json(r#"{"formula_row_ceiling": null, "histogram_buckets": 20}"#).unwrap();
        assert_eq!(config.formula_row_ceiling, None);
        assert_eq!(config.histogram_buckets, 20);
        assert_eq!(config.retry_delay_ms, 250);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            ViewConfig::from_json(r#"{"histogram_buckets": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(ViewConfig::from_json("{not json"), Err(ConfigError::Parse(_))));
    }
}
