// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Path appended to `LOG_URL_API` to reach the collector's create endpoint.
pub const COLLECTOR_PATH: &str = "/api/logs/create";

const DEFAULT_QUEUE_CAPACITY: usize = 1000;
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TOKEN_SUBJECT: &str = "global-auth-server";

/// Configuration for the audit shipper, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipperConfig {
    /// Full URL events are posted to
    pub destination_url: String,
    /// Maximum number of events waiting in the queue
    pub queue_capacity: usize,
    /// Number of events that triggers an immediate flush
    pub batch_size: usize,
    /// Period of the time-based flush
    pub batch_interval: Duration,
    /// Retries per event after the first attempt
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Timeout applied to every POST
    pub request_timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Subject of the tokens minted for outbound calls
    pub token_subject: String,
}

impl ShipperConfig {
    /// Builds a configuration with the service defaults for everything but
    /// the destination.
    pub fn new(destination_url: impl Into<String>) -> Self {
        Self {
            destination_url: destination_url.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_interval: DEFAULT_BATCH_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            https_proxy: None,
            token_subject: DEFAULT_TOKEN_SUBJECT.to_string(),
        }
    }

    /// Create configuration from environment variables
    ///
    /// | Env Var                  | Required | Default              |
    /// |--------------------------|----------|----------------------|
    /// | `LOG_URL_API`            | **yes**  | --                   |
    /// | `LOG_QUEUE_CAPACITY`     | no       | `1000`               |
    /// | `LOG_BATCH_SIZE`         | no       | `10`                 |
    /// | `LOG_BATCH_INTERVAL_MS`  | no       | `2000`               |
    /// | `LOG_MAX_RETRIES`        | no       | `3`                  |
    /// | `LOG_RETRY_DELAY_MS`     | no       | `5000`               |
    /// | `LOG_REQUEST_TIMEOUT_MS` | no       | `5000`               |
    /// | `LOG_TOKEN_SUBJECT`      | no       | `global-auth-server` |
    /// | `LOG_HTTPS_PROXY`        | no       | `HTTPS_PROXY`        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as [`ShipperConfig::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("LOG_URL_API")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::Missing("LOG_URL_API"))?;

        let mut config = Self::new(format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            COLLECTOR_PATH
        ));

        if let Some(capacity) = parse_var(&lookup, "LOG_QUEUE_CAPACITY")? {
            config.queue_capacity = capacity;
        }
        if let Some(batch_size) = parse_var(&lookup, "LOG_BATCH_SIZE")? {
            config.batch_size = batch_size;
        }
        if let Some(ms) = parse_var(&lookup, "LOG_BATCH_INTERVAL_MS")? {
            config.batch_interval = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var(&lookup, "LOG_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(ms) = parse_var(&lookup, "LOG_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "LOG_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(subject) = lookup("LOG_TOKEN_SUBJECT").filter(|s| !s.trim().is_empty()) {
            config.token_subject = subject;
        }
        config.https_proxy = lookup("LOG_HTTPS_PROXY").or_else(|| lookup("HTTPS_PROXY"));

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destination_url.trim().is_empty() {
            return Err(ConfigError::Missing("LOG_URL_API"));
        }
        if let Err(e) = reqwest::Url::parse(&self.destination_url) {
            return Err(ConfigError::Invalid {
                var: "LOG_URL_API",
                reason: format!("'{}' is not a valid URL: {e}", self.destination_url),
            });
        }
        if self.queue_capacity == 0 {
            return Err(must_be_positive("LOG_QUEUE_CAPACITY"));
        }
        if self.batch_size == 0 {
            return Err(must_be_positive("LOG_BATCH_SIZE"));
        }
        if self.batch_interval.is_zero() {
            return Err(must_be_positive("LOG_BATCH_INTERVAL_MS"));
        }
        if self.request_timeout.is_zero() {
            return Err(must_be_positive("LOG_REQUEST_TIMEOUT_MS"));
        }
        Ok(())
    }
}

fn must_be_positive(var: &'static str) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: "must be greater than 0".to_string(),
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                var,
                reason: format!("'{raw}': {e}"),
            }),
    }
}
