//! Timeouts and intervals that bound every reconciliation.
use crate::error::{self, Result};

use models::constants::{
    OPERATION_TIMEOUT_ENV_VAR, POLL_INTERVAL_ENV_VAR, READ_TIMEOUT_ENV_VAR, RETRY_BASE_DELAY_ENV_VAR,
    RETRY_MAX_DELAY_ENV_VAR, WRITE_TIMEOUT_ENV_VAR,
};

use snafu::{ensure, ResultExt};
use std::env;
use tokio::time::Duration;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(180);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(1800);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReconcilerConfig {
    /// Upper bound on retrying a single describe call.
    pub read_timeout: Duration,
    /// Upper bound on retrying a single mutating call. Writes are slower to settle than reads.
    pub write_timeout: Duration,
    /// Deadline shared by every call and poll of one create, update, delete or read.
    pub operation_timeout: Duration,
    pub poll_interval: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
        }
    }
}

impl ReconcilerConfig {
    /// Builds a configuration from `RECONCILER_*_SECS` environment variables, falling back to defaults.
    pub fn try_from_env() -> Result<Self> {
        Self::try_from_lookup(|variable| env::var(variable).ok())
    }

    fn try_from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |variable: &'static str, default: Duration| -> Result<Duration> {
            match lookup(variable) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .context(error::ConfigurationSnafu { variable, value }),
                None => Ok(default),
            }
        };

        let config = ReconcilerConfig {
            read_timeout: secs(READ_TIMEOUT_ENV_VAR, defaults.read_timeout)?,
            write_timeout: secs(WRITE_TIMEOUT_ENV_VAR, defaults.write_timeout)?,
            operation_timeout: secs(OPERATION_TIMEOUT_ENV_VAR, defaults.operation_timeout)?,
            poll_interval: secs(POLL_INTERVAL_ENV_VAR, defaults.poll_interval)?,
            retry_base_delay: secs(RETRY_BASE_DELAY_ENV_VAR, defaults.retry_base_delay)?,
            retry_max_delay: secs(RETRY_MAX_DELAY_ENV_VAR, defaults.retry_max_delay)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.poll_interval.is_zero(),
            error::InvalidConfigurationSnafu {
                message: "poll interval must be greater than zero"
            }
        );
        ensure!(
            !self.retry_base_delay.is_zero(),
            error::InvalidConfigurationSnafu {
                message: "retry base delay must be greater than zero"
            }
        );
        ensure!(
            self.retry_base_delay <= self.retry_max_delay,
            error::InvalidConfigurationSnafu {
                message: "retry base delay must not exceed the retry max delay"
            }
        );
        ensure!(
            self.read_timeout <= self.operation_timeout && self.write_timeout <= self.operation_timeout,
            error::InvalidConfigurationSnafu {
                message: "call timeouts must not exceed the operation timeout"
            }
        );
        Ok(())
    }
}
