//! Configuration loading and representation.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use crate::error::RepositoryError;
use crate::retry::RetryPolicy;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const MAX_CONNECTIONS: &str = "SLOTKEEPER_DB_MAX_CONNECTIONS";
pub const TX_MAX_ATTEMPTS: &str = "SLOTKEEPER_TX_MAX_ATTEMPTS";
pub const TX_BACKOFF_MS: &str = "SLOTKEEPER_TX_BACKOFF_MS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to connect to database: {0}")]
    Connect(String),

    #[error("failed to prepare schema: {0}")]
    Schema(#[from] RepositoryError),
}

/// Infrastructure settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraConfig {
    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub retry: RetryPolicy,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl InfraConfig {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = lookup(DATABASE_URL).filter(|v| !v.trim().is_empty());
        let max_connections = parse_or(&lookup, MAX_CONNECTIONS, defaults.max_connections)?;
        let max_attempts = parse_or(&lookup, TX_MAX_ATTEMPTS, defaults.retry.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: TX_MAX_ATTEMPTS,
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let backoff_ms = parse_or(
            &lookup,
            TX_BACKOFF_MS,
            defaults.retry.backoff.as_millis() as u64,
        )?;

        Ok(Self {
            database_url,
            max_connections,
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(backoff_ms)),
        })
    }

    /// Open a Postgres pool. Requires `database_url`.
    pub async fn connect(&self) -> Result<PgPool, ConfigError> {
        let url = self
            .database_url
            .as_deref()
            .ok_or(ConfigError::Missing(DATABASE_URL))?;
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(url)
            .await
            .map_err(|e| ConfigError::Connect(e.to_string()))
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = InfraConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, InfraConfig::default());
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn reads_all_keys() {
        let cfg = InfraConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://localhost/slots"),
            (MAX_CONNECTIONS, "12"),
            (TX_MAX_ATTEMPTS, "5"),
            (TX_BACKOFF_MS, "25"),
        ]))
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/slots"));
        assert_eq!(cfg.max_connections, 12);
        assert_eq!(cfg.retry, RetryPolicy::new(5, Duration::from_millis(25)));
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let cfg = InfraConfig::from_lookup(lookup(&[(DATABASE_URL, "  ")])).unwrap();
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = InfraConfig::from_lookup(lookup(&[(MAX_CONNECTIONS, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: MAX_CONNECTIONS, .. }));
    }

    #[test]
    fn rejects_zero_attempts() {
        let err = InfraConfig::from_lookup(lookup(&[(TX_MAX_ATTEMPTS, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: TX_MAX_ATTEMPTS, .. }));
    }

    #[tokio::test]
    async fn connect_requires_a_url() {
        let err = InfraConfig::default().connect().await.unwrap_err();
        assert_eq!(err, ConfigError::Missing(DATABASE_URL));
    }
}
