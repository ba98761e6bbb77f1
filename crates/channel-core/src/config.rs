//! Environment-backed tuning for the channel controller.

use std::{env, time::Duration};

use thiserror::Error;

pub const DEFAULT_MAIN_PAGE_SIZE: usize = 100;
pub const DEFAULT_THREAD_PAGE_SIZE: usize = 50;
const DEFAULT_PUBLISH_THROTTLE_MS: u64 = 500;
const DEFAULT_LOAD_MORE_DEBOUNCE_MS: u64 = 2_000;
const DEFAULT_LOAD_MORE_THROTTLE_MS: u64 = 2_000;
const DEFAULT_MARK_READ_THROTTLE_MS: u64 = 500;
const MAX_PAGE_SIZE: usize = 300;

/// Controller tuning values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Page size for main timeline queries (network and storage).
    pub main_page_size: usize,
    /// Page size for thread reply queries.
    pub thread_page_size: usize,
    /// Window of the throttled publisher used by the event listener.
    pub publish_throttle_ms: u64,
    /// Window of the debounced pagination "finished" callbacks.
    pub load_more_debounce_ms: u64,
    /// Window of the throttled outward `request_load_more` entry point.
    pub load_more_throttle_ms: u64,
    /// Window of the throttled `mark_read`.
    pub mark_read_throttle_ms: u64,
    /// Persist messages to durable storage and fall back to it when offline.
    pub offline_storage: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            main_page_size: DEFAULT_MAIN_PAGE_SIZE,
            thread_page_size: DEFAULT_THREAD_PAGE_SIZE,
            publish_throttle_ms: DEFAULT_PUBLISH_THROTTLE_MS,
            load_more_debounce_ms: DEFAULT_LOAD_MORE_DEBOUNCE_MS,
            load_more_throttle_ms: DEFAULT_LOAD_MORE_THROTTLE_MS,
            mark_read_throttle_ms: DEFAULT_MARK_READ_THROTTLE_MS,
            offline_storage: false,
        }
    }
}

impl ControllerConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            main_page_size: parse_or(
                "CHANNEL_MAIN_PAGE_SIZE",
                defaults.main_page_size,
                &mut lookup,
            )?,
            thread_page_size: parse_or(
                "CHANNEL_THREAD_PAGE_SIZE",
                defaults.thread_page_size,
                &mut lookup,
            )?,
            publish_throttle_ms: parse_or(
                "CHANNEL_PUBLISH_THROTTLE_MS",
                defaults.publish_throttle_ms,
                &mut lookup,
            )?,
            load_more_debounce_ms: parse_or(
                "CHANNEL_LOAD_MORE_DEBOUNCE_MS",
                defaults.load_more_debounce_ms,
                &mut lookup,
            )?,
            load_more_throttle_ms: parse_or(
                "CHANNEL_LOAD_MORE_THROTTLE_MS",
                defaults.load_more_throttle_ms,
                &mut lookup,
            )?,
            mark_read_throttle_ms: parse_or(
                "CHANNEL_MARK_READ_THROTTLE_MS",
                defaults.mark_read_throttle_ms,
                &mut lookup,
            )?,
            offline_storage: parse_flag(
                "CHANNEL_OFFLINE_STORAGE",
                defaults.offline_storage,
                &mut lookup,
            )?,
        };

        validate_page_size("CHANNEL_MAIN_PAGE_SIZE", config.main_page_size)?;
        validate_page_size("CHANNEL_THREAD_PAGE_SIZE", config.thread_page_size)?;
        Ok(config)
    }

    pub fn with_offline_storage(mut self, enabled: bool) -> Self {
        self.offline_storage = enabled;
        self
    }

    pub fn publish_throttle(&self) -> Duration {
        Duration::from_millis(self.publish_throttle_ms)
    }

    pub fn load_more_debounce(&self) -> Duration {
        Duration::from_millis(self.load_more_debounce_ms)
    }

    pub fn load_more_throttle(&self) -> Duration {
        Duration::from_millis(self.load_more_throttle_ms)
    }

    pub fn mark_read_throttle(&self) -> Duration {
        Duration::from_millis(self.mark_read_throttle_ms)
    }
}

/// Errors produced while parsing configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed or is out of range.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            reason: err.to_string(),
            value,
        })
}

fn parse_flag<F>(key: &'static str, default: bool, lookup: &mut F) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a boolean flag".to_owned(),
        }),
    }
}

fn validate_page_size(key: &'static str, size: usize) -> Result<(), ConfigError> {
    if (1..=MAX_PAGE_SIZE).contains(&size) {
        return Ok(());
    }
    Err(ConfigError::InvalidValue {
        key,
        value: size.to_string(),
        reason: format!("must be between 1 and {MAX_PAGE_SIZE}"),
    })
}
