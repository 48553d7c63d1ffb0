//! Harness configuration.
//!
//! # Configuration Precedence
//!
//! 1. **Programmatic**: values set via builder methods
//! 2. **Environment variables**: `ORDERCHECK_*` overrides applied by
//!    [`HarnessConfig::from_env`]
//! 3. **Defaults**: [`HarnessConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `ORDERCHECK_MAX_STEPS` | `u64` (`0` = unlimited) | `lab.max_steps` |
//! | `ORDERCHECK_DRAIN_DETACHED` | `bool` | `lab.drain_detached` |
//! | `ORDERCHECK_IDLE_TIMEOUT_MS` | `u64` (`0` = no bound) | `lab.idle_timeout` |
//! | `ORDERCHECK_CANCEL_FILTER` | `scenario` \| `any` | `cancellation_filter` |

use crate::error::Failure;
use crate::lab::LabConfig;
use crate::types::RegionId;
use std::time::Duration;

/// Environment variable name for the lab step limit.
pub const ENV_MAX_STEPS: &str = "ORDERCHECK_MAX_STEPS";
/// Environment variable name for draining detached tasks at close.
pub const ENV_DRAIN_DETACHED: &str = "ORDERCHECK_DRAIN_DETACHED";
/// Environment variable name for the idle timeout, in milliseconds.
pub const ENV_IDLE_TIMEOUT_MS: &str = "ORDERCHECK_IDLE_TIMEOUT_MS";
/// Environment variable name for the cancellation filter policy.
pub const ENV_CANCEL_FILTER: &str = "ORDERCHECK_CANCEL_FILTER";

/// Errors produced while resolving configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// The variable name.
        var: &'static str,
        /// What the variable should contain.
        expected: &'static str,
        /// The raw value found.
        value: String,
    },
}

/// Which cancellation failures are dropped before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancellationFilter {
    /// Drop only cancellations attributed to the running scenario's region.
    ///
    /// A cancellation from a foreign or unattributed scope counts as an
    /// ordinary unhandled failure.
    #[default]
    ScenarioTree,
    /// Drop every cancellation failure, whatever produced it.
    Any,
}

impl CancellationFilter {
    /// Returns true if `failure` is benign teardown noise for `region`.
    #[must_use]
    pub fn is_benign(self, failure: &Failure, region: RegionId) -> bool {
        if !failure.is_cancelled() {
            return false;
        }
        match self {
            Self::Any => true,
            Self::ScenarioTree => failure.region_id() == Some(region),
        }
    }
}

/// Configuration for a [`TestCase`](crate::oracle::TestCase).
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Configuration handed to the default lab scheduler.
    pub lab: LabConfig,
    /// Cancellation filtering policy.
    pub cancellation_filter: CancellationFilter,
    /// Whether failures leaving the harness are written to the diagnostic
    /// output: recorded failures and the failure a run rethrows.
    pub log_failures: bool,
}

impl HarnessConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lab: LabConfig::default(),
            cancellation_filter: CancellationFilter::default(),
            log_failures: true,
        }
    }

    /// Creates the default configuration with `ORDERCHECK_*` overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Sets the lab scheduler configuration.
    #[must_use]
    pub fn lab(mut self, lab: LabConfig) -> Self {
        self.lab = lab;
        self
    }

    /// Sets the cancellation filtering policy.
    #[must_use]
    pub const fn cancellation_filter(mut self, filter: CancellationFilter) -> Self {
        self.cancellation_filter = filter;
        self
    }

    /// Sets whether failures leaving the harness are logged.
    #[must_use]
    pub const fn log_failures(mut self, value: bool) -> Self {
        self.log_failures = value;
        self
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply environment variable overrides to a [`HarnessConfig`].
///
/// Only variables that are set in the environment are applied.
pub fn apply_env_overrides(config: &mut HarnessConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_MAX_STEPS) {
        config.lab.max_steps = match parse_u64(ENV_MAX_STEPS, &val)? {
            0 => None,
            steps => Some(steps),
        };
    }
    if let Some(val) = read_env(ENV_DRAIN_DETACHED) {
        config.lab.drain_detached = parse_bool(ENV_DRAIN_DETACHED, &val)?;
    }
    if let Some(val) = read_env(ENV_IDLE_TIMEOUT_MS) {
        config.lab.idle_timeout = match parse_u64(ENV_IDLE_TIMEOUT_MS, &val)? {
            0 => None,
            millis => Some(Duration::from_millis(millis)),
        };
    }
    if let Some(val) = read_env(ENV_CANCEL_FILTER) {
        config.cancellation_filter = parse_filter(ENV_CANCEL_FILTER, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
        var,
        expected: "unsigned integer",
        value: val.to_string(),
    })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            expected: "bool (true/false/1/0/yes/no)",
            value: val.to_string(),
        }),
    }
}

fn parse_filter(var: &'static str, val: &str) -> Result<CancellationFilter, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "scenario" | "scenario-tree" => Ok(CancellationFilter::ScenarioTree),
        "any" => Ok(CancellationFilter::Any),
        _ => Err(ConfigError::InvalidEnv {
            var,
            expected: "scenario or any",
            value: val.to_string(),
        }),
    }
}
