//! Harness configuration
//!
//! Configuration is read through the [`ConfigSource`] key/value lookup so the
//! harness does not care whether values come from the environment, a
//! properties file or an in-memory map. [`HarnessConfig::from_source`] parses
//! every known key up front and fails fast on malformed numbers instead of
//! silently falling back to defaults mid-run.

use std::collections::HashMap;
use std::env;
use std::fmt::Debug;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_THREADS: &str = "max.threads";
pub const CORE_THREADS: &str = "core.threads";
pub const THREAD_KEEPALIVE_SECONDS: &str = "thread.keepalive.seconds";
pub const CALLBACK_THREADS: &str = "callback.threads";
pub const RETRY_COUNT: &str = "retry.count";
pub const RETRY_DELAY: &str = "retry.delay";
pub const RESPONSE_TIME_THRESHOLD: &str = "performance.response.time.threshold";
pub const ERROR_RATE_THRESHOLD: &str = "performance.error.rate.threshold";
pub const THROUGHPUT_THRESHOLD: &str = "performance.throughput.threshold";
pub const DEFAULT_TIMEOUT_SECONDS: &str = "parallel.default.timeout.seconds";
pub const ACQUIRE_TIMEOUT_MS: &str = "resource.acquire.timeout.ms";
pub const STRESS_COOLDOWN_SECONDS: &str = "stress.cooldown.seconds";

/// Configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A value was present but could not be used
    #[error("invalid value {value:?} for '{key}': {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    /// The properties text could not be parsed
    #[error("malformed properties line {line}: {content:?}")]
    MalformedLine { line: usize, content: String },
}

/// A key/value configuration lookup
pub trait ConfigSource: Send + Sync {
    /// Raw string value for `key`, if present
    fn get(&self, key: &str) -> Option<String>;
}

/// Typed accessors available on every [`ConfigSource`]
pub trait ConfigLookup {
    fn get_string(&self, key: &str, default: &str) -> String;
    fn get_u64(&self, key: &str, default: u64) -> Result<u64, ConfigError>;
    fn get_f64(&self, key: &str, default: f64) -> Result<f64, ConfigError>;
    fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError>;
}

impl<S: ConfigSource + ?Sized> ConfigLookup for S {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn get_u64(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        parse_or(self, key, default)
    }

    fn get_f64(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        let value: f64 = parse_or(self, key, default)?;
        if !value.is_finite() {
            return Err(invalid(key, &value.to_string(), "must be a finite number"));
        }
        Ok(value)
    }

    fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(invalid(key, &raw, "expected a boolean")),
            },
        }
    }
}

fn parse_or<S, T>(source: &S, key: &str, default: T) -> Result<T, ConfigError>
where
    S: ConfigSource + ?Sized,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match source.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Reads configuration from environment variables
///
/// Dotted keys are upper-cased with dots replaced by underscores and prefixed,
/// so `max.threads` is read from `LOADSWARM_MAX_THREADS`.
#[derive(Debug, Clone)]
pub struct EnvConfigSource {
    prefix: String,
}

impl Default for EnvConfigSource {
    fn default() -> Self {
        Self::new("LOADSWARM")
    }
}

impl EnvConfigSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable name for a dotted key
    pub fn var_name(&self, key: &str) -> String {
        let key = key.replace(['.', '-'], "_").to_uppercase();
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}_{}", self.prefix, key)
        }
    }
}

impl ConfigSource for EnvConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(self.var_name(key)).ok()
    }
}

/// In-memory configuration, also used for properties files
#[derive(Debug, Clone, Default)]
pub struct MapConfigSource {
    values: HashMap<String, String>,
}

impl MapConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    /// Parse `key=value` (or `key: value`) lines
    ///
    /// Blank lines and lines starting with `#` or `!` are ignored.
    pub fn from_properties(text: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                continue;
            }
            let split = trimmed.find(['=', ':']).ok_or_else(|| ConfigError::MalformedLine {
                line: idx + 1,
                content: line.to_string(),
            })?;
            let key = trimmed[..split].trim();
            if key.is_empty() {
                return Err(ConfigError::MalformedLine {
                    line: idx + 1,
                    content: line.to_string(),
                });
            }
            values.insert(key.to_string(), trimmed[split + 1..].trim().to_string());
        }
        Ok(Self { values })
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// First-match lookup over several sources, highest priority first
#[derive(Default)]
pub struct LayeredConfigSource {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl LayeredConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, source: impl ConfigSource + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }
}

impl ConfigSource for LayeredConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }
}

/// Fully parsed harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Maximum concurrent scenario invocations
    pub max_threads: usize,
    /// Runtime worker threads when the harness builds its own runtime
    pub core_threads: usize,
    /// Keep-alive for idle runtime threads
    pub thread_keepalive: Duration,
    /// Maximum concurrently running completion callbacks
    pub callback_threads: usize,
    /// Retries after the first attempt
    pub retry_count: u32,
    /// Minimum gap between two attempts of the same unit
    pub retry_delay: Duration,
    /// Average response time threshold in milliseconds
    pub response_time_threshold_ms: f64,
    /// Error rate threshold in percent
    pub error_rate_threshold: f64,
    /// Minimum throughput in requests per second
    pub throughput_threshold: f64,
    /// Default invocation and batch timeout
    pub default_timeout: Duration,
    /// Default resource pool acquire timeout
    pub acquire_timeout: Duration,
    /// Pause between stress steps
    pub stress_cool_down: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_threads: 50,
            core_threads: 10,
            thread_keepalive: Duration::from_secs(60),
            callback_threads: 4,
            retry_count: 2,
            retry_delay: Duration::from_millis(1000),
            response_time_threshold_ms: 3000.0,
            error_rate_threshold: 5.0,
            throughput_threshold: 10.0,
            default_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_millis(5000),
            stress_cool_down: Duration::from_secs(5),
        }
    }
}

impl HarnessConfig {
    /// Parse every known key from `source`, using defaults for missing keys
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_threads = positive(source, MAX_THREADS, defaults.max_threads as u64)?;
        let core_threads = positive(source, CORE_THREADS, defaults.core_threads as u64)?;
        let callback_threads =
            positive(source, CALLBACK_THREADS, defaults.callback_threads as u64)?;

        let retry_count = source.get_u64(RETRY_COUNT, defaults.retry_count as u64)?;
        let retry_count = u32::try_from(retry_count)
            .map_err(|_| invalid(RETRY_COUNT, &retry_count.to_string(), "too large"))?;

        let error_rate_threshold =
            non_negative(source, ERROR_RATE_THRESHOLD, defaults.error_rate_threshold)?;
        if error_rate_threshold > 100.0 {
            return Err(invalid(
                ERROR_RATE_THRESHOLD,
                &error_rate_threshold.to_string(),
                "must be a percentage between 0 and 100",
            ));
        }

        Ok(Self {
            max_threads: max_threads as usize,
            core_threads: core_threads as usize,
            thread_keepalive: Duration::from_secs(source.get_u64(
                THREAD_KEEPALIVE_SECONDS,
                defaults.thread_keepalive.as_secs(),
            )?),
            callback_threads: callback_threads as usize,
            retry_count,
            retry_delay: Duration::from_millis(
                source.get_u64(RETRY_DELAY, defaults.retry_delay.as_millis() as u64)?,
            ),
            response_time_threshold_ms: non_negative(
                source,
                RESPONSE_TIME_THRESHOLD,
                defaults.response_time_threshold_ms,
            )?,
            error_rate_threshold,
            throughput_threshold: non_negative(
                source,
                THROUGHPUT_THRESHOLD,
                defaults.throughput_threshold,
            )?,
            default_timeout: Duration::from_secs(
                source.get_u64(DEFAULT_TIMEOUT_SECONDS, defaults.default_timeout.as_secs())?,
            ),
            acquire_timeout: Duration::from_millis(
                source.get_u64(ACQUIRE_TIMEOUT_MS, defaults.acquire_timeout.as_millis() as u64)?,
            ),
            stress_cool_down: Duration::from_secs(
                source.get_u64(STRESS_COOLDOWN_SECONDS, defaults.stress_cool_down.as_secs())?,
            ),
        })
    }

    /// Read configuration from `LOADSWARM_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&EnvConfigSource::default())
    }

    /// A multi-thread runtime builder sized from this configuration
    pub fn runtime_builder(&self) -> tokio::runtime::Builder {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder
            .worker_threads(self.core_threads)
            .max_blocking_threads(self.max_threads.max(self.callback_threads))
            .thread_keep_alive(self.thread_keepalive)
            .thread_name("loadswarm-worker")
            .enable_all();
        builder
    }
}

fn positive(source: &dyn ConfigSource, key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = source.get_u64(key, default)?;
    if value == 0 {
        return Err(invalid(key, "0", "must be greater than zero"));
    }
    Ok(value)
}

fn non_negative(source: &dyn ConfigSource, key: &str, default: f64) -> Result<f64, ConfigError> {
    let value = source.get_f64(key, default)?;
    if value < 0.0 {
        return Err(invalid(key, &value.to_string(), "must not be negative"));
    }
    Ok(value)
}
