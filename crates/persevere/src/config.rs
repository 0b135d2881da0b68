// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_EXPONENTIAL_INITIAL_DELAY, DEFAULT_EXPONENTIAL_MULTIPLIER, DEFAULT_FIXED_INTERVAL, DEFAULT_MAX_RETRIES};
use crate::{Backoff, FailureKind, RetryPolicy};

/// An error produced while validating a [`RetryConfig`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The exponential multiplier is not a finite number above zero.
    #[error("backoff multiplier must be finite and above zero, got {0}")]
    InvalidMultiplier(f64),

    /// The proportional jitter multiplier is negative or not finite.
    #[error("proportional jitter must be finite and not negative, got {0}")]
    InvalidJitter(f64),

    /// The minimum delay bound is above the maximum delay bound.
    #[error("minimum delay of {min_ms}ms exceeds maximum delay of {max_ms}ms")]
    InvertedBounds {
        /// The configured lower bound in milliseconds.
        min_ms: u64,
        /// The configured upper bound in milliseconds.
        max_ms: u64,
    },
}

/// Serializable settings of a [`RetryExecutor`][crate::RetryExecutor].
///
/// Every field has a default, so a configuration source only needs to name what it changes.
/// Turn it into an executor with [`RetryExecutor::from_config`][crate::RetryExecutor::from_config].
///
/// # Examples
///
/// ```
/// use persevere::{FailureKind, RetryConfig};
///
/// let config: RetryConfig = serde_json::from_str(
///     r#"{
///         "max_retries": 5,
///         "backoff": { "strategy": { "kind": "exponential", "initial_delay_ms": 250 }, "max_delay_ms": 8000 },
///         "retry_on": ["transient", "rate_limited"]
///     }"#,
/// )
/// .unwrap();
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.retry_on, [FailureKind::Transient, FailureKind::RateLimited]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Backoff applied between attempts.
    pub backoff: BackoffConfig,

    /// Backoff used instead of [`backoff`][Self::backoff] after a rate-limited attempt.
    pub rate_limit_backoff: Option<BackoffConfig>,

    /// Space attempts start-to-start instead of end-to-start.
    pub fixed_rate: bool,

    /// Failure kinds eligible for retry; empty means all of them.
    pub retry_on: Vec<FailureKind>,
}

impl RetryConfig {
    /// Checks every backoff in the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backoff.validate()?;
        self.rate_limit_backoff.as_ref().map_or(Ok(()), BackoffConfig::validate)
    }

    /// Builds the policy described by this configuration.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries).retry_on(self.retry_on.iter().copied())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffConfig::default(),
            rate_limit_backoff: None,
            fixed_rate: false,
            retry_on: Vec::new(),
        }
    }
}

/// Serializable description of a [`Backoff`].
///
/// Decorators are applied in a fixed order: proportional jitter, uniform jitter, the minimum
/// bound, the maximum bound, and finally the zero first-retry delay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// The base strategy.
    pub strategy: BackoffStrategy,

    /// Relative spread of proportional jitter, for example `0.1` for ±10%.
    pub proportional_jitter: Option<f64>,

    /// Half-width of the uniform jitter window in milliseconds.
    pub uniform_jitter_ms: Option<u64>,

    /// Lower bound of every delay in milliseconds.
    pub min_delay_ms: Option<u64>,

    /// Upper bound of every delay in milliseconds.
    pub max_delay_ms: Option<u64>,

    /// Run the first retry without delay.
    pub first_retry_no_delay: bool,
}

impl BackoffConfig {
    /// Checks the strategy parameters and bounds.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let BackoffStrategy::Exponential { multiplier, .. } = self.strategy
            && !(multiplier.is_finite() && multiplier > 0.0)
        {
            return Err(ConfigError::InvalidMultiplier(multiplier));
        }

        if let Some(jitter) = self.proportional_jitter
            && !(jitter.is_finite() && jitter >= 0.0)
        {
            return Err(ConfigError::InvalidJitter(jitter));
        }

        if let (Some(min_ms), Some(max_ms)) = (self.min_delay_ms, self.max_delay_ms)
            && min_ms > max_ms
        {
            return Err(ConfigError::InvertedBounds { min_ms, max_ms });
        }

        Ok(())
    }

    /// Validates the configuration and builds the backoff it describes.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn build(&self) -> Result<Backoff, ConfigError> {
        self.validate()?;

        let mut backoff = match self.strategy {
            BackoffStrategy::Fixed { delay_ms } => Backoff::fixed(Duration::from_millis(delay_ms)),
            BackoffStrategy::Exponential {
                initial_delay_ms,
                multiplier,
            } => Backoff::exponential(Duration::from_millis(initial_delay_ms), multiplier),
        };

        if let Some(jitter) = self.proportional_jitter {
            backoff = backoff.with_proportional_jitter(jitter);
        }
        if let Some(range_ms) = self.uniform_jitter_ms {
            backoff = backoff.with_uniform_jitter(Duration::from_millis(range_ms));
        }
        if let Some(min_ms) = self.min_delay_ms {
            backoff = backoff.with_min_delay(Duration::from_millis(min_ms));
        }
        if let Some(max_ms) = self.max_delay_ms {
            backoff = backoff.with_max_delay(Duration::from_millis(max_ms));
        }
        if self.first_retry_no_delay {
            backoff = backoff.with_first_retry_no_delay();
        }

        Ok(backoff)
    }
}

/// The base strategy of a [`BackoffConfig`], tagged by `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed {
        /// The delay in milliseconds.
        #[serde(default = "default_fixed_delay_ms")]
        delay_ms: u64,
    },

    /// Delay multiplied by `multiplier` on every retry.
    Exponential {
        /// The delay before attempt zero in milliseconds.
        #[serde(default = "default_initial_delay_ms")]
        initial_delay_ms: u64,

        /// The growth factor.
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Fixed {
            delay_ms: default_fixed_delay_ms(),
        }
    }
}

fn default_fixed_delay_ms() -> u64 {
    millis_u64(DEFAULT_FIXED_INTERVAL)
}

fn default_initial_delay_ms() -> u64 {
    millis_u64(DEFAULT_EXPONENTIAL_INITIAL_DELAY)
}

fn default_multiplier() -> f64 {
    DEFAULT_EXPONENTIAL_MULTIPLIER
}

fn millis_u64(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
