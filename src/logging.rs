//! Structured logging setup and header obfuscation.
//!
//! [`init_logging`] installs a `tracing-subscriber` registry with an
//! `EnvFilter` and a JSON (production) or pretty (development) formatter.
//! [`Obfuscator`] keeps credentials carried in headers out of logs and APM
//! events.

use anyhow::{Context, Result};
use http::HeaderMap;
use std::collections::{BTreeMap, HashSet};
use std::env;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub log_level: String,
    pub format: LogFormat,
    /// Extra `EnvFilter` directives, comma-separated (`gatehouse::router=debug`)
    pub target_filter: Option<String>,
    /// Include file:line location
    pub include_location: bool,
}

impl LogConfig {
    /// Read `GATEHOUSE_LOG_LEVEL`, `GATEHOUSE_LOG_FORMAT` and
    /// `GATEHOUSE_LOG_TARGET_FILTER`.
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("GATEHOUSE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: LogFormat::parse(
                &env::var("GATEHOUSE_LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
            ),
            target_filter: env::var("GATEHOUSE_LOG_TARGET_FILTER").ok(),
            include_location: false,
        }
    }

    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            target_filter: None,
            include_location: true,
        }
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let level = match config.log_level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let mut env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Some(target_filter) = &config.target_filter {
        for filter in target_filter.split(',') {
            let filter = filter.trim();
            if filter.is_empty() {
                continue;
            }
            match filter.parse() {
                Ok(directive) => env_filter = env_filter.add_directive(directive),
                Err(_) => eprintln!("Warning: Invalid log filter directive: {filter}"),
            }
        }
    }
    env_filter
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")
}

const SENSITIVE_HEADERS: [&str; 5] = [
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
];

const MASK: &str = "***";

/// Masks sensitive header values.
///
/// Credentials with an auth scheme keep the scheme so logs still tell
/// `Bearer` from `Basic` (`Bearer ***`).
#[derive(Debug, Clone)]
pub struct Obfuscator {
    sensitive: HashSet<String>,
}

impl Default for Obfuscator {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl Obfuscator {
    /// Build an obfuscator masking the built-in sensitive headers plus `extra`.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sensitive = SENSITIVE_HEADERS
            .iter()
            .map(|h| (*h).to_string())
            .chain(extra.into_iter().map(|h| h.as_ref().to_ascii_lowercase()))
            .collect();
        Self { sensitive }
    }

    #[must_use]
    pub fn is_sensitive(&self, name: &str) -> bool {
        self.sensitive.contains(&name.to_ascii_lowercase())
    }

    /// Obfuscate one header value.
    #[must_use]
    pub fn obfuscate(&self, name: &str, value: &str) -> String {
        if !self.is_sensitive(name) {
            return value.to_string();
        }
        match value.split_once(' ') {
            Some((scheme, _))
                if name.eq_ignore_ascii_case("authorization")
                    || name.eq_ignore_ascii_case("proxy-authorization") =>
            {
                format!("{scheme} {MASK}")
            }
            _ => MASK.to_string(),
        }
    }

    /// Copy a header map into a loggable form with sensitive values masked.
    /// Repeated headers are joined with `, `.
    #[must_use]
    pub fn headers(&self, headers: &HeaderMap) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            let raw = String::from_utf8_lossy(value.as_bytes());
            let shown = self.obfuscate(name.as_str(), &raw);
            out.entry(name.as_str().to_string())
                .and_modify(|v| {
                    v.push_str(", ");
                    v.push_str(&shown);
                })
                .or_insert(shown);
        }
        out
    }
}
