//! Queue configuration.
//!
//! Defaults reproduce the production tier table. Every value can be overridden
//! from the environment:
//!
//! | Variable                         | Meaning                               |
//! |----------------------------------|---------------------------------------|
//! | `HOOKQ_<TIER>_CONCURRENCY`       | workers for the tier (≥ 1)            |
//! | `HOOKQ_<TIER>_RETRY_DELAY_MS`    | fixed retry delay for the tier (≤ 24h) |
//! | `HOOKQ_DEFAULT_MAX_ATTEMPTS`     | attempt ceiling when the caller omits it |
//! | `HOOKQ_IDLE_POLL_MS`             | longest an idle worker waits before re-checking |
//! | `HOOKQ_KEYWORDS_FILE`            | JSON file with classifier keyword lists |
//!
//! `<TIER>` is one of `URGENT`, `HIGH`, `NORMAL`, `LOW`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use hookq_core::Priority;

use crate::jobs::{ClassifierConfig, DEFAULT_MAX_ATTEMPTS};

/// Configuration error (bad environment value or keyword file).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },

    #[error("cannot read keyword file {path}: {source}")]
    KeywordsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed keyword file {path}: {source}")]
    KeywordsFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Longest accepted per-tier retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Sizing of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierConfig {
    pub concurrency: usize,
    pub retry_delay: Duration,
}

impl TierConfig {
    /// A tier always has at least one worker.
    pub const fn new(concurrency: usize, retry_delay: Duration) -> Self {
        Self {
            concurrency: if concurrency == 0 { 1 } else { concurrency },
            retry_delay,
        }
    }
}

/// Per-tier sizing for all four tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTable {
    pub urgent: TierConfig,
    pub high: TierConfig,
    pub normal: TierConfig,
    pub low: TierConfig,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            urgent: TierConfig::new(5, Duration::from_secs(1)),
            high: TierConfig::new(3, Duration::from_secs(2)),
            normal: TierConfig::new(2, Duration::from_secs(5)),
            low: TierConfig::new(1, Duration::from_secs(10)),
        }
    }
}

impl TierTable {
    pub fn get(&self, priority: Priority) -> &TierConfig {
        match priority {
            Priority::Urgent => &self.urgent,
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    pub fn get_mut(&mut self, priority: Priority) -> &mut TierConfig {
        match priority {
            Priority::Urgent => &mut self.urgent,
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }

    /// Maximum number of jobs processed at the same time.
    pub fn total_concurrency(&self) -> usize {
        Priority::ALL.iter().map(|p| self.get(*p).concurrency).sum()
    }

    /// Retry delays indexed by [`Priority::index`].
    pub fn retry_delays(&self) -> [Duration; 4] {
        Priority::ALL.map(|p| self.get(p).retry_delay)
    }
}

/// Top-level queue configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub tiers: TierTable,
    pub default_max_attempts: u32,
    pub idle_poll: Duration,
    pub classifier: ClassifierConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            idle_poll: Duration::from_secs(1),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_tier(mut self, priority: Priority, concurrency: usize, retry_delay: Duration) -> Self {
        if concurrency == 0 {
            warn!(%priority, "tier concurrency 0 raised to 1");
        }
        *self.tiers.get_mut(priority) = TierConfig::new(concurrency, retry_delay);
        self
    }

    /// Same retry delay for every tier (handy in tests).
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        for p in Priority::ALL {
            self.tiers.get_mut(p).retry_delay = retry_delay;
        }
        self
    }

    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = classifier;
        self
    }

    /// Load overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load overrides through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        for p in Priority::ALL {
            let tier = p.as_str().to_ascii_uppercase();
            let concurrency_var = format!("HOOKQ_{tier}_CONCURRENCY");
            if let Some(n) = parse_var::<usize, _>(&lookup, &concurrency_var)? {
                if n == 0 {
                    return Err(invalid(&concurrency_var, "0", "must be at least 1"));
                }
                config.tiers.get_mut(p).concurrency = n;
            }
            let delay_var = format!("HOOKQ_{tier}_RETRY_DELAY_MS");
            if let Some(ms) = parse_var::<u64, _>(&lookup, &delay_var)? {
                let delay = Duration::from_millis(ms);
                if delay > MAX_RETRY_DELAY {
                    return Err(invalid(
                        &delay_var,
                        &ms.to_string(),
                        format!("must not exceed {} ms", MAX_RETRY_DELAY.as_millis()),
                    ));
                }
                config.tiers.get_mut(p).retry_delay = delay;
            }
        }

        if let Some(n) = parse_var::<u32, _>(&lookup, "HOOKQ_DEFAULT_MAX_ATTEMPTS")? {
            if n == 0 {
                return Err(invalid("HOOKQ_DEFAULT_MAX_ATTEMPTS", "0", "must be at least 1"));
            }
            config.default_max_attempts = n;
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "HOOKQ_IDLE_POLL_MS")? {
            if ms == 0 {
                return Err(invalid("HOOKQ_IDLE_POLL_MS", "0", "must be at least 1"));
            }
            config.idle_poll = Duration::from_millis(ms);
        }

        if let Some(path) = lookup("HOOKQ_KEYWORDS_FILE") {
            config.classifier = load_keywords(PathBuf::from(path))?;
        }

        Ok(config)
    }
}

/// Read a [`ClassifierConfig`] from a JSON file. Missing lists keep their defaults.
pub fn load_keywords(path: PathBuf) -> Result<ClassifierConfig, ConfigError> {
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::KeywordsRead {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::KeywordsFormat { path, source })
}

fn invalid(var: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(var, &raw, e.to_string())),
    }
}
