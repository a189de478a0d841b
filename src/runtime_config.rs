//! # Runtime Configuration Module
//!
//! Knobs that change how the transaction pipeline behaves at runtime. They can
//! come from environment variables ([`RuntimeConfig::from_env`]) or from a YAML
//! file ([`RuntimeConfig::from_yaml_file`]); every field has a default.
//!
//! ## Environment Variables
//!
//! | Variable                          | Field                   | Default          |
//! |-----------------------------------|-------------------------|------------------|
//! | `GATEHOUSE_BUFFER_LIMIT`          | `buffer_limit`          | `500000`         |
//! | `GATEHOUSE_TIMEOUT_MS`            | `timeout_ms`            | `30000`          |
//! | `GATEHOUSE_DEBUG`                 | `debug`                 | `false`          |
//! | `GATEHOUSE_SCHEMA_CACHING`        | `schema_caching`        | `optimistic`     |
//! | `GATEHOUSE_TRANSACTION_ID_HEADER` | `transaction_id_header` | `Transaction-Id` |
//! | `GATEHOUSE_STACK_SIZE`            | `stack_size`            | `0x10000`        |
//! | `GATEHOUSE_OBFUSCATED_HEADERS`    | `obfuscated_headers`    | (empty)          |
//!
//! `GATEHOUSE_STACK_SIZE` accepts decimal (`65536`) or hexadecimal (`0x10000`).
//! `GATEHOUSE_OBFUSCATED_HEADERS` is a comma-separated list of extra header
//! names whose values never reach logs.
//!
//! ## YAML
//!
//! ```yaml
//! buffer_limit: 1048576
//! timeout_ms: 5000
//! debug: true
//! schema_caching: hashed
//! transaction_id_header: X-Transaction-Id
//! ```

use crate::validator_cache::SchemaCaching;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BUFFER_LIMIT: usize = 500_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_STACK_SIZE: usize = 0x10000;
pub const DEFAULT_TRANSACTION_ID_HEADER: &str = "Transaction-Id";

/// Runtime configuration of the routing and transaction pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of bytes buffered for a validated request body.
    pub buffer_limit: usize,
    /// Transaction timeout in milliseconds.
    pub timeout_ms: u64,
    /// Validate responses against their schemas and send error debug data.
    pub debug: bool,
    /// Caching regime of the schema validator registry.
    pub schema_caching: SchemaCaching,
    /// Header carrying the transaction ID in both directions.
    pub transaction_id_header: String,
    /// Stack size for transaction coroutines in bytes.
    pub stack_size: usize,
    /// Extra header names obfuscated in logs and APM events.
    pub obfuscated_headers: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            debug: false,
            schema_caching: SchemaCaching::default(),
            transaction_id_header: DEFAULT_TRANSACTION_ID_HEADER.to_string(),
            stack_size: DEFAULT_STACK_SIZE,
            obfuscated_headers: Vec::new(),
        }
    }
}

fn parse_size(val: &str) -> Option<usize> {
    if let Some(hex) = val.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        val.parse().ok()
    }
}

fn env_or<T>(name: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
    match env::var(name) {
        Ok(val) => parse(val.trim()).unwrap_or_else(|| {
            warn!(variable = name, value = %val, "Ignoring unparsable configuration value");
            default
        }),
        Err(_) => default,
    }
}

impl RuntimeConfig {
    /// Load configuration from `GATEHOUSE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        RuntimeConfig {
            buffer_limit: env_or("GATEHOUSE_BUFFER_LIMIT", defaults.buffer_limit, parse_size),
            timeout_ms: env_or("GATEHOUSE_TIMEOUT_MS", defaults.timeout_ms, |v| v.parse().ok()),
            debug: env_or("GATEHOUSE_DEBUG", defaults.debug, |v| v.parse().ok()),
            schema_caching: env_or("GATEHOUSE_SCHEMA_CACHING", defaults.schema_caching, |v| {
                v.parse().ok()
            }),
            transaction_id_header: env::var("GATEHOUSE_TRANSACTION_ID_HEADER")
                .unwrap_or(defaults.transaction_id_header),
            stack_size: env_or("GATEHOUSE_STACK_SIZE", defaults.stack_size, parse_size),
            obfuscated_headers: env::var("GATEHOUSE_OBFUSCATED_HEADERS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Parse configuration from a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error when the YAML is malformed or a field has the wrong type.
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.buffer_limit, DEFAULT_BUFFER_LIMIT);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.transaction_id_header, "Transaction-Id");
        assert_eq!(config.schema_caching, SchemaCaching::Optimistic);
        assert!(!config.debug);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("0x4000"), Some(0x4000));
        assert_eq!(parse_size("16384"), Some(16384));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = RuntimeConfig::from_yaml_str(
            "buffer_limit: 1024\ndebug: true\nschema_caching: hashed\n",
        )
        .unwrap();
        assert_eq!(config.buffer_limit, 1024);
        assert!(config.debug);
        assert_eq!(config.schema_caching, SchemaCaching::Hashed);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_from_yaml_rejects_bad_types() {
        assert!(RuntimeConfig::from_yaml_str("buffer_limit: lots").is_err());
    }
}
