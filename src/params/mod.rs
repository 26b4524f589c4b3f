//! Runtime parameters.
//!
//! [`Config`] is the configuration surface recognized by the data-access core.
//! [`Configurables`] extends it with the deployment settings read from the
//! process environment (a `.env` file is honored by the binary).

use std::str::FromStr;
use std::time::Duration;

use log::trace;

use crate::error::ConfigurationError;

pub mod env {
    pub const BATCH_SIZE: &str = "LAZYROWS_BATCH_SIZE";
    pub const MAX_RETRIES: &str = "LAZYROWS_MAX_RETRIES";
    pub const RETRY_DELAY_MS: &str = "LAZYROWS_RETRY_DELAY_MS";
    pub const MAX_CONCURRENT_FETCHES: &str = "LAZYROWS_MAX_CONCURRENT_FETCHES";
    pub const DATABASE_URL: &str = "DATABASE_URL";
}

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://users.db";

/// Core configuration: window size and retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl Config {
    pub fn try_new(
        batch_size: usize,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<Self, ConfigurationError> {
        if batch_size == 0 {
            return Err(ConfigurationError::ZeroBatchSize);
        }
        Ok(Self {
            batch_size,
            max_retries,
            retry_delay,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self, ConfigurationError> {
        if batch_size == 0 {
            return Err(ConfigurationError::ZeroBatchSize);
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

/// Settings read from the environment.
#[derive(Debug, Clone)]
pub struct Configurables {
    pub config: Config,
    pub max_concurrent_fetches: usize,
    pub database_url: String,
}

impl Configurables {
    /// Loads the settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the settings using `lookup` to resolve each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let batch_size = parse_or(&lookup, env::BATCH_SIZE, DEFAULT_BATCH_SIZE)?;
        let max_retries = parse_or(&lookup, env::MAX_RETRIES, DEFAULT_MAX_RETRIES)?;
        let retry_delay_ms = parse_or(
            &lookup,
            env::RETRY_DELAY_MS,
            DEFAULT_RETRY_DELAY.as_millis() as u64,
        )?;
        let max_concurrent_fetches = parse_or(
            &lookup,
            env::MAX_CONCURRENT_FETCHES,
            DEFAULT_MAX_CONCURRENT_FETCHES,
        )?;
        if max_concurrent_fetches == 0 {
            return Err(ConfigurationError::ZeroConcurrency);
        }

        let database_url =
            lookup(env::DATABASE_URL).unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned());

        let config = Config::try_new(
            batch_size,
            max_retries,
            Duration::from_millis(retry_delay_ms),
        )?;

        trace!("{:?}", config);

        Ok(Self {
            config,
            max_concurrent_fetches,
            database_url,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigurationError::InvalidParam {
                key: key.to_owned(),
                value: raw.clone(),
                msg: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = Configurables::from_lookup(lookup(&[])).unwrap();
        assert_eq!(c.config, Config::default());
        assert_eq!(c.max_concurrent_fetches, DEFAULT_MAX_CONCURRENT_FETCHES);
        assert_eq!(c.database_url, DEFAULT_DATABASE_URL);
    }

    #[test]
    fn overrides() {
        let c = Configurables::from_lookup(lookup(&[
            (env::BATCH_SIZE, "50"),
            (env::MAX_RETRIES, "0"),
            (env::RETRY_DELAY_MS, "250"),
            (env::DATABASE_URL, "sqlite://other.db"),
        ]))
        .unwrap();

        assert_eq!(c.config.batch_size(), 50);
        assert_eq!(c.config.max_retries(), 0);
        assert_eq!(c.config.retry_delay(), Duration::from_millis(250));
        assert_eq!(c.database_url, "sqlite://other.db");
    }

    #[test]
    fn negative_retries_fail_fast() {
        let err = Configurables::from_lookup(lookup(&[(env::MAX_RETRIES, "-1")])).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidParam { key, .. } if key == env::MAX_RETRIES));
    }

    #[test]
    fn zero_batch_size_fails_fast() {
        let err = Configurables::from_lookup(lookup(&[(env::BATCH_SIZE, "0")])).unwrap_err();
        assert_eq!(err, ConfigurationError::ZeroBatchSize);

        assert_eq!(
            Config::default().with_batch_size(0).unwrap_err(),
            ConfigurationError::ZeroBatchSize
        );
    }

    #[test]
    fn zero_concurrency_fails_fast() {
        let err =
            Configurables::from_lookup(lookup(&[(env::MAX_CONCURRENT_FETCHES, "0")])).unwrap_err();
        assert_eq!(err, ConfigurationError::ZeroConcurrency);
    }
}
