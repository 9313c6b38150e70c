//! Runtime configuration read from the environment.
//!
//! | variable                   | default                      |
//! |----------------------------|------------------------------|
//! | `TTISCAN_PORT`             | `8080`                       |
//! | `TTISCAN_DATABASE_URL`     | `sqlite:ttiscan.db?mode=rwc` |
//! | `TTISCAN_MAX_UPLOAD_BYTES` | 16 MiB                       |
//! | `TTISCAN_HISTORY_LIMIT`    | `50`                         |
//! | `TTISCAN_DISTANCE_METRIC`  | `rgb` (or `delta-e`)         |

use std::env;
use std::str::FromStr;

use tracing::warn;

use crate::classifier::DistanceMetric;

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 8080;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DB_URL: &str = "sqlite:ttiscan.db?mode=rwc";

/// Largest accepted request body.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Default number of history entries returned per request.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub max_upload_bytes: usize,
    pub history_limit: u32,
    pub metric: DistanceMetric,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: DEFAULT_DB_URL.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            metric: DistanceMetric::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let metric = match lookup("TTISCAN_DISTANCE_METRIC") {
            Some(raw) => DistanceMetric::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "Unknown TTISCAN_DISTANCE_METRIC, using rgb");
                defaults.metric
            }),
            None => defaults.metric,
        };

        Self {
            port: parsed(&lookup, "TTISCAN_PORT", defaults.port),
            database_url: lookup("TTISCAN_DATABASE_URL").unwrap_or(defaults.database_url),
            max_upload_bytes: parsed(&lookup, "TTISCAN_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            history_limit: parsed(&lookup, "TTISCAN_HISTORY_LIMIT", defaults.history_limit),
            metric,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Ignoring unparseable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(Config::from_lookup(|_| None), Config::default());
    }

    #[test]
    fn test_reads_overrides() {
        let vars = HashMap::from([
            ("TTISCAN_PORT", "9000"),
            ("TTISCAN_DATABASE_URL", "sqlite::memory:"),
            ("TTISCAN_HISTORY_LIMIT", "10"),
            ("TTISCAN_DISTANCE_METRIC", "delta-e"),
        ]);
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.port, 9000);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.metric, DistanceMetric::DeltaE76);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let vars = HashMap::from([("TTISCAN_PORT", "eighty"), ("TTISCAN_DISTANCE_METRIC", "hsv")]);
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.metric, DistanceMetric::Rgb);
    }
}
