//! Configuration loading and representation.
//!
//! Everything comes from environment variables with defaults suitable for local
//! development. The binary loads a `.env` file first, if present.

use core::fmt::Display;
use core::str::FromStr;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use eventhall_observability::LogFormat;

use crate::retry::RetryPolicy;

pub const BIND_ADDR: &str = "EVENTHALL_BIND_ADDR";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DATABASE_MAX_CONNECTIONS: &str = "DATABASE_MAX_CONNECTIONS";
pub const REGISTRATION_MAX_DELTA: &str = "REGISTRATION_MAX_DELTA";
pub const REGISTRATION_MAX_ATTEMPTS: &str = "REGISTRATION_MAX_ATTEMPTS";
pub const REGISTRATION_BACKOFF_MS: &str = "REGISTRATION_BACKOFF_MS";
pub const SEED_DEMO: &str = "EVENTHALL_SEED_DEMO";
pub const LOG_FORMAT: &str = "EVENTHALL_LOG_FORMAT";
pub const SHUTDOWN_TIMEOUT_SECS: &str = "EVENTHALL_SHUTDOWN_TIMEOUT_SECS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Display) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` runs against the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub registration: RegistrationConfig,
    pub log_format: LogFormat,
    /// Insert the demo events at startup.
    pub seed_demo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Upper bound on draining in-flight requests after a shutdown signal.
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationConfig {
    /// Largest `|incrementBy|` accepted by a single adjustment.
    pub max_delta: i32,
    /// Compare-and-swap attempts before giving up with a concurrency error.
    pub max_attempts: u32,
    /// Backoff after the first conflict; doubles per attempt.
    pub backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5075)),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_delta: 100,
            max_attempts: 8,
            backoff: Duration::from_millis(5),
        }
    }
}

impl RegistrationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff)
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            bind_addr: parse_or(&get, BIND_ADDR, defaults.server.bind_addr)?,
            shutdown_timeout: Duration::from_secs(parse_or(
                &get,
                SHUTDOWN_TIMEOUT_SECS,
                defaults.server.shutdown_timeout.as_secs(),
            )?),
        };

        let database = match get(DATABASE_URL) {
            None => None,
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: at_least_one(
                    &get,
                    DATABASE_MAX_CONNECTIONS,
                    parse_or(&get, DATABASE_MAX_CONNECTIONS, 5u32)?,
                )?,
            }),
        };

        let registration = RegistrationConfig {
            max_delta: at_least_one(
                &get,
                REGISTRATION_MAX_DELTA,
                parse_or(&get, REGISTRATION_MAX_DELTA, defaults.registration.max_delta)?,
            )?,
            max_attempts: at_least_one(
                &get,
                REGISTRATION_MAX_ATTEMPTS,
                parse_or(
                    &get,
                    REGISTRATION_MAX_ATTEMPTS,
                    defaults.registration.max_attempts,
                )?,
            )?,
            backoff: Duration::from_millis(parse_or(
                &get,
                REGISTRATION_BACKOFF_MS,
                5u64,
            )?),
        };

        let log_format = match get(LOG_FORMAT) {
            None => defaults.log_format,
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|e| ConfigError::invalid(LOG_FORMAT, &raw, e))?,
        };

        let seed_demo = match get(SEED_DEMO) {
            None => defaults.seed_demo,
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                ConfigError::invalid(SEED_DEMO, &raw, "expected true/false")
            })?,
        };

        Ok(Self {
            server,
            database,
            registration,
            log_format,
            seed_demo,
        })
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(var, &raw, e)),
    }
}

fn at_least_one<T, G>(get: &G, var: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + From<u8> + Display,
    G: Fn(&str) -> Option<String>,
{
    if value < T::from(1u8) {
        let raw = get(var).unwrap_or_else(|| value.to_string());
        return Err(ConfigError::invalid(var, &raw, "must be at least 1"));
    }
    Ok(value)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.bind_addr.port(), 5075);
        assert!(config.database.is_none());
        assert_eq!(config.registration.max_delta, 100);
    }

    #[test]
    fn reads_every_variable() {
        let config = load(&[
            (BIND_ADDR, "127.0.0.1:8080"),
            (DATABASE_URL, "postgres://localhost/eventhall"),
            (DATABASE_MAX_CONNECTIONS, "12"),
            (REGISTRATION_MAX_DELTA, "50"),
            (REGISTRATION_MAX_ATTEMPTS, "3"),
            (REGISTRATION_BACKOFF_MS, "0"),
            (SEED_DEMO, "yes"),
            (LOG_FORMAT, "pretty"),
            (SHUTDOWN_TIMEOUT_SECS, "2"),
        ])
        .unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(2));
        assert_eq!(
            config.database,
            Some(DatabaseConfig {
                url: "postgres://localhost/eventhall".to_string(),
                max_connections: 12,
            })
        );
        assert_eq!(
            config.registration,
            RegistrationConfig {
                max_delta: 50,
                max_attempts: 3,
                backoff: Duration::ZERO,
            }
        );
        assert_eq!(config.registration.retry_policy().max_attempts, 3);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.seed_demo);
    }

    #[test]
    fn rejects_malformed_values() {
        for (var, value) in [
            (BIND_ADDR, "not-an-addr"),
            (REGISTRATION_MAX_DELTA, "lots"),
            (REGISTRATION_MAX_DELTA, "0"),
            (REGISTRATION_MAX_ATTEMPTS, "-1"),
            (SEED_DEMO, "maybe"),
            (LOG_FORMAT, "xml"),
        ] {
            match load(&[(var, value)]) {
                Err(ConfigError::Invalid { var: got, .. }) => assert_eq!(got, var),
                other => panic!("{var}={value}: expected error, got {other:?}"),
            }
        }
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[(DATABASE_URL, "  "), (LOG_FORMAT, "")]).unwrap();
        assert!(config.database.is_none());
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
