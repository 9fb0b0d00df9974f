//! Run configuration, loaded once from the environment.

use std::time::Duration;

use thiserror::Error;

use crate::dedup::{DEFAULT_NAMESPACE_TEMPLATE, SOURCE_PLACEHOLDER};
use crate::document_store::validate_identifier;
use crate::store::DEFAULT_KEY_FIELD;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/jobsink";
pub const DEFAULT_COLLECTION: &str = "testing_jobs";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

/// Static process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub redis_url: String,
    pub database_url: String,
    pub collection: String,
    pub unique_key: String,
    pub seen_set_template: String,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub pg_max_connections: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            unique_key: DEFAULT_KEY_FIELD.to_string(),
            seen_set_template: DEFAULT_NAMESPACE_TEMPLATE.to_string(),
            connect_timeout: Duration::from_millis(5000),
            operation_timeout: Duration::from_millis(5000),
            pg_max_connections: 5,
        }
    }
}

impl Settings {
    /// Load from process environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` to resolve variables (`None` = unset).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let string = |var: &str, default: String| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        let settings = Settings {
            redis_url: string("REDIS_URL", defaults.redis_url),
            database_url: string("DATABASE_URL", defaults.database_url),
            collection: string("JOBSINK_COLLECTION", defaults.collection),
            unique_key: string("JOBSINK_UNIQUE_KEY", defaults.unique_key),
            seen_set_template: string("JOBSINK_SEEN_SET_TEMPLATE", defaults.seen_set_template),
            connect_timeout: millis(&lookup, "JOBSINK_CONNECT_TIMEOUT_MS", defaults.connect_timeout)?,
            operation_timeout: millis(&lookup, "JOBSINK_OPERATION_TIMEOUT_MS", defaults.operation_timeout)?,
            pg_max_connections: positive(&lookup, "JOBSINK_PG_MAX_CONNECTIONS", u64::from(defaults.pg_max_connections))?
                .try_into()
                .map_err(|_| ConfigError::invalid("JOBSINK_PG_MAX_CONNECTIONS", "too large"))?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier(&self.collection)
            .map_err(|e| ConfigError::invalid("JOBSINK_COLLECTION", e.to_string()))?;
        validate_identifier(&self.unique_key)
            .map_err(|e| ConfigError::invalid("JOBSINK_UNIQUE_KEY", e.to_string()))?;
        if !self.seen_set_template.contains(SOURCE_PLACEHOLDER) {
            return Err(ConfigError::invalid(
                "JOBSINK_SEEN_SET_TEMPLATE",
                format!("'{}' must contain {SOURCE_PLACEHOLDER}", self.seen_set_template),
            ));
        }
        Ok(())
    }
}

fn positive<F>(lookup: &F, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var).filter(|v| !v.trim().is_empty()) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::invalid(var, "must be greater than zero")),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::invalid(var, format!("'{raw}' is not a number: {e}"))),
    }
}

fn millis<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    positive(lookup, var, default_ms).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = load(&[]).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.collection, "testing_jobs");
        assert_eq!(settings.unique_key, "slug");
        assert_eq!(settings.connect_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn overrides_are_read() {
        let settings = load(&[
            ("REDIS_URL", "redis://cache:6380/2"),
            ("JOBSINK_COLLECTION", "jobs_2024"),
            ("JOBSINK_UNIQUE_KEY", "req_id"),
            ("JOBSINK_SEEN_SET_TEMPLATE", "seen:{source}"),
            ("JOBSINK_OPERATION_TIMEOUT_MS", "250"),
            ("JOBSINK_PG_MAX_CONNECTIONS", "12"),
        ])
        .unwrap();

        assert_eq!(settings.redis_url, "redis://cache:6380/2");
        assert_eq!(settings.collection, "jobs_2024");
        assert_eq!(settings.unique_key, "req_id");
        assert_eq!(settings.seen_set_template, "seen:{source}");
        assert_eq!(settings.operation_timeout, Duration::from_millis(250));
        assert_eq!(settings.pg_max_connections, 12);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let settings = load(&[("JOBSINK_COLLECTION", "  "), ("JOBSINK_CONNECT_TIMEOUT_MS", "")]).unwrap();
        assert_eq!(settings.collection, DEFAULT_COLLECTION);
        assert_eq!(settings.connect_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn bad_values_are_rejected() {
        let cases = [
            ("JOBSINK_COLLECTION", "jobs; DROP TABLE x"),
            ("JOBSINK_UNIQUE_KEY", "9lives"),
            ("JOBSINK_SEEN_SET_TEMPLATE", "seen_ids"),
            ("JOBSINK_CONNECT_TIMEOUT_MS", "soon"),
            ("JOBSINK_OPERATION_TIMEOUT_MS", "0"),
            ("JOBSINK_PG_MAX_CONNECTIONS", "-1"),
        ];
        for (var, value) in cases {
            match load(&[(var, value)]) {
                Err(ConfigError::Invalid { var: reported, .. }) => assert_eq!(reported, var),
                Ok(_) => panic!("{var}={value} should be rejected"),
            }
        }
    }
}
