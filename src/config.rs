use serde::Deserialize;
use thiserror::Error;

use crate::aggregator::DEFAULT_LOG_HISTORY;

/// Prefix of every environment variable read by [`Config::from_env`].
pub const ENV_PREFIX: &str = "WIRESTATS_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime settings, read from `WIRESTATS_*` variables.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    /// Address the demo server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Redis servers (`host:port`), comma separated in the environment
    #[serde(default = "default_upstreams")]
    pub upstreams: Vec<String>,

    /// Statistics queue capacity
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,

    /// Log lines kept by the aggregator
    #[serde(default = "default_log_history")]
    pub log_history: usize,

    /// Load generator workers
    #[serde(default = "default_load_concurrency")]
    pub load_concurrency: u32,

    /// Load generator run time (seconds)
    #[serde(default = "default_load_duration_secs")]
    pub load_duration_secs: u64,

    /// Percentage of load generator operations that are reads (0–100)
    #[serde(default = "default_read_pct")]
    pub read_pct: u8,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".into()
}
fn default_upstreams() -> Vec<String> {
    vec!["127.0.0.1:6379".into()]
}
fn default_feed_capacity() -> usize {
    1024
}
fn default_log_history() -> usize {
    DEFAULT_LOG_HISTORY
}
fn default_load_concurrency() -> u32 {
    8
}
fn default_load_duration_secs() -> u64 {
    10
}
fn default_read_pct() -> u8 {
    80
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstreams: default_upstreams(),
            feed_capacity: default_feed_capacity(),
            log_history: default_log_history(),
            load_concurrency: default_load_concurrency(),
            load_duration_secs: default_load_duration_secs(),
            read_pct: default_read_pct(),
        }
    }
}

impl Config {
    /// Loads `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Reads settings from arbitrary key/value pairs (keys carry the prefix).
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstreams.is_empty() {
            return Err(ConfigError::Invalid("at least one upstream is required".into()));
        }
        if self.feed_capacity == 0 {
            return Err(ConfigError::Invalid("feed_capacity must be positive".into()));
        }
        if self.read_pct > 100 {
            return Err(ConfigError::Invalid("read_pct must be between 0 and 100".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_vars(Vec::new()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn reads_prefixed_variables() {
        let config = Config::from_vars(vars(&[
            ("WIRESTATS_LISTEN_ADDR", "127.0.0.1:8080"),
            ("WIRESTATS_UPSTREAMS", "10.0.0.1:6379,10.0.0.2:6379"),
            ("WIRESTATS_FEED_CAPACITY", "16"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.upstreams, vec!["10.0.0.1:6379", "10.0.0.2:6379"]);
        assert_eq!(config.feed_capacity, 16);
        assert_eq!(config.log_history, DEFAULT_LOG_HISTORY);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            Config::from_vars(vars(&[("WIRESTATS_READ_PCT", "120")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_vars(vars(&[("WIRESTATS_FEED_CAPACITY", "lots")])),
            Err(ConfigError::Env(_))
        ));
    }
}
