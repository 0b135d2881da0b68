// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Default values used when a setting is not configured.

use std::time::Duration;

/// Default interval of [`Backoff::fixed`][crate::Backoff::fixed] when nothing else is configured.
pub const DEFAULT_FIXED_INTERVAL: Duration = Duration::from_secs(1);

/// Default first delay of an exponential backoff built from configuration.
pub const DEFAULT_EXPONENTIAL_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Default growth factor of an exponential backoff built from configuration.
pub const DEFAULT_EXPONENTIAL_MULTIPLIER: f64 = 2.0;

/// Half-width of the jitter window of [`Backoff::with_default_uniform_jitter`][crate::Backoff::with_default_uniform_jitter].
pub const DEFAULT_UNIFORM_JITTER_RANGE: Duration = Duration::from_millis(100);

/// Relative spread of [`Backoff::with_default_proportional_jitter`][crate::Backoff::with_default_proportional_jitter] (±10%).
pub const DEFAULT_PROPORTIONAL_JITTER: f64 = 0.1;

/// Lower bound applied by [`Backoff::with_default_min_delay`][crate::Backoff::with_default_min_delay].
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(100);

/// Upper bound applied by [`Backoff::with_default_max_delay`][crate::Backoff::with_default_max_delay].
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
