//! Configuration management for the agent.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use moi_engine::RetryPolicy;

use crate::engine::EngineSettings;

/// What happens to queued writes across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePersistence {
    /// Keep the queue in SQLite and restore it on startup.
    Persist,
    /// Keep the queue in memory only.
    Discard,
}

impl FromStr for QueuePersistence {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "persist" => Ok(Self::Persist),
            "discard" => Ok(Self::Discard),
            _ => Err(()),
        }
    }
}

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the local HTTP surface
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Base URL of the remote store; `None` uses the in-process store
    pub remote_url: Option<String>,
    /// Bearer token sent to the remote store
    pub remote_token: Option<String>,
    /// SQLite URL for queue persistence
    pub database_url: Option<String>,
    pub queue_persistence: QueuePersistence,
    pub sync_interval: Duration,
    pub debounce: Duration,
    pub probe_interval: Duration,
    pub remote_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of a key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", 4100u16)?;

        let remote_url = non_empty(lookup("REMOTE_URL"));
        let remote_token = non_empty(lookup("REMOTE_TOKEN"));
        let database_url = non_empty(lookup("DATABASE_URL"));

        let queue_persistence = match non_empty(lookup("QUEUE_PERSISTENCE")) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "QUEUE_PERSISTENCE",
            })?,
            None if database_url.is_some() => QueuePersistence::Persist,
            None => QueuePersistence::Discard,
        };
        if queue_persistence == QueuePersistence::Persist && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        let max_attempts = match non_empty(lookup("MAX_ATTEMPTS")) {
            Some(raw) => Some(
                raw.parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or(ConfigError::Invalid { key: "MAX_ATTEMPTS" })?,
            ),
            None => None,
        };

        let retry = RetryPolicy::new(
            millis(&lookup, "RETRY_BASE_SECS", 30)?,
            millis(&lookup, "RETRY_MAX_SECS", 300)?,
            max_attempts,
        );

        Ok(Self {
            host,
            port,
            remote_url,
            remote_token,
            database_url,
            queue_persistence,
            sync_interval: Duration::from_secs(positive(&lookup, "SYNC_INTERVAL_SECS", 30)?),
            debounce: Duration::from_millis(parse_or(&lookup, "DEBOUNCE_MS", 300u64)?),
            probe_interval: Duration::from_secs(positive(&lookup, "PROBE_INTERVAL_SECS", 5)?),
            remote_timeout: Duration::from_secs(positive(&lookup, "REMOTE_TIMEOUT_SECS", 10)?),
            retry,
        })
    }

    /// Timing and retry knobs for the sync engine.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            sync_interval: self.sync_interval,
            remote_timeout: self.remote_timeout,
            retry: self.retry,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match non_empty(lookup(key)) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key }),
        None => Ok(default),
    }
}

fn positive<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default)? {
        0 => Err(ConfigError::Invalid { key }),
        n => Ok(n),
    }
}

/// A seconds setting converted to milliseconds.
fn millis<F>(lookup: &F, key: &'static str, default_secs: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default_secs)?
        .checked_mul(1000)
        .ok_or(ConfigError::Invalid { key })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL is required when QUEUE_PERSISTENCE=persist")]
    MissingDatabaseUrl,

    #[error("Invalid {key} value")]
    Invalid { key: &'static str },
}
