// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::RetryContext;
use crate::constants::{DEFAULT_FIXED_INTERVAL, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY, DEFAULT_PROPORTIONAL_JITTER, DEFAULT_UNIFORM_JITTER_RANGE};

/// Computes the delay before the next attempt from a [`RetryContext`].
///
/// A backoff is an immutable strategy tree: two base strategies ([`fixed`][Self::fixed] and
/// [`exponential`][Self::exponential]) and decorators that wrap another backoff. Every
/// `with_*` method returns a new, decorated backoff and leaves the receiver untouched, so one
/// base value can be shared by several differently decorated chains. Cloning is an `Arc` clone.
///
/// Decorators run outside-in: the outermost decorator's logic runs first and decides how (and
/// with which context) its target is consulted. Apply bounds last when they must hold for
/// the whole chain.
///
/// Delays are signed milliseconds. Jitter can push a delay below zero and nothing in the chain
/// corrects that except [`with_min_delay`][Self::with_min_delay]; the delayed-task queue treats
/// a non-positive delay as "run as soon as possible".
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use persevere::{Backoff, RetryContext};
///
/// let backoff = Backoff::exponential(Duration::from_millis(100), 2.0)
///     .with_proportional_jitter(0.1)
///     .with_max_delay(Duration::from_secs(5));
///
/// let context = RetryContext::new().next_retry(std::io::Error::other("busy"));
/// let delay = backoff.delay_millis(&context);
/// assert!((180..=220).contains(&delay));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff(Arc<Strategy>);

#[derive(Debug)]
enum Strategy {
    FixedInterval { interval_millis: i64 },
    Exponential { initial_millis: i64, multiplier: f64 },
    UniformJitter { target: Backoff, range_millis: i64, sampler: Sampler },
    ProportionalJitter { target: Backoff, multiplier: f64, sampler: Sampler },
    MinDelay { target: Backoff, min_millis: i64 },
    MaxDelay { target: Backoff, max_millis: i64 },
    FirstRetryNoDelay { target: Backoff },
}

/// Where jitter decorators draw their random factor from.
#[derive(Clone, Default)]
enum Sampler {
    #[default]
    Fastrand,

    #[cfg(test)]
    Scripted(Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Sampler {
    #[cfg(test)]
    fn scripted(next: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        Self::Scripted(Arc::new(next))
    }

    /// Draws a factor in `(-1, 1]`. A raw sample of `0.0` maps to `1`, `0.5` to `0`.
    fn signed_unit(&self) -> f64 {
        let sample = match self {
            Self::Fastrand => fastrand::f64(),
            #[cfg(test)]
            Self::Scripted(next) => next(),
        };

        2.0f64.mul_add(-sample, 1.0)
    }
}

impl Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fastrand => f.write_str("Fastrand"),
            #[cfg(test)]
            Self::Scripted(_) => f.write_str("Scripted"),
        }
    }
}

impl Backoff {
    /// Waits the same `interval` before every retry.
    #[must_use]
    pub fn fixed(interval: Duration) -> Self {
        Self::from_strategy(Strategy::FixedInterval {
            interval_millis: duration_to_millis(interval),
        })
    }

    /// Waits `initial * multiplier^attempt_index` before a retry.
    ///
    /// The result saturates at `i64::MAX` milliseconds instead of overflowing; combine with
    /// [`with_max_delay`][Self::with_max_delay] to keep the total wait bounded.
    #[must_use]
    pub fn exponential(initial: Duration, multiplier: f64) -> Self {
        Self::from_strategy(Strategy::Exponential {
            initial_millis: duration_to_millis(initial),
            multiplier,
        })
    }

    /// Retries immediately.
    #[must_use]
    pub fn no_delay() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Adds a uniformly distributed offset in `[-range, +range]` to the target's delay.
    #[must_use]
    pub fn with_uniform_jitter(&self, range: Duration) -> Self {
        self.uniform_jitter_with(range, Sampler::default())
    }

    /// Adds uniform jitter of [`DEFAULT_UNIFORM_JITTER_RANGE`][crate::constants::DEFAULT_UNIFORM_JITTER_RANGE] (±100ms).
    #[must_use]
    pub fn with_default_uniform_jitter(&self) -> Self {
        self.with_uniform_jitter(DEFAULT_UNIFORM_JITTER_RANGE)
    }

    /// Scales the target's delay by a random factor in `[1 - multiplier, 1 + multiplier]`.
    #[must_use]
    pub fn with_proportional_jitter(&self, multiplier: f64) -> Self {
        self.proportional_jitter_with(multiplier, Sampler::default())
    }

    /// Adds proportional jitter of [`DEFAULT_PROPORTIONAL_JITTER`][crate::constants::DEFAULT_PROPORTIONAL_JITTER] (±10%).
    #[must_use]
    pub fn with_default_proportional_jitter(&self) -> Self {
        self.with_proportional_jitter(DEFAULT_PROPORTIONAL_JITTER)
    }

    /// Raises any delay of the target below `min` up to `min`.
    #[must_use]
    pub fn with_min_delay(&self, min: Duration) -> Self {
        Self::from_strategy(Strategy::MinDelay {
            target: self.clone(),
            min_millis: duration_to_millis(min),
        })
    }

    /// Raises delays to at least [`DEFAULT_MIN_DELAY`][crate::constants::DEFAULT_MIN_DELAY] (100ms).
    #[must_use]
    pub fn with_default_min_delay(&self) -> Self {
        self.with_min_delay(DEFAULT_MIN_DELAY)
    }

    /// Caps any delay of the target above `max` down to `max`.
    #[must_use]
    pub fn with_max_delay(&self, max: Duration) -> Self {
        Self::from_strategy(Strategy::MaxDelay {
            target: self.clone(),
            max_millis: duration_to_millis(max),
        })
    }

    /// Caps delays at [`DEFAULT_MAX_DELAY`][crate::constants::DEFAULT_MAX_DELAY] (10s).
    #[must_use]
    pub fn with_default_max_delay(&self) -> Self {
        self.with_max_delay(DEFAULT_MAX_DELAY)
    }

    /// Returns `0` for a first-retry context and otherwise consults the target one attempt earlier.
    ///
    /// The decorator answers `0` exactly when [`RetryContext::is_first_retry`] holds. For every
    /// other context it hands its target `context` with the attempt index decremented by one.
    /// Targets are calibrated so that the first *delayed* retry is attempt 1; shifting by one
    /// keeps their delay table aligned once an undelayed retry is inserted in front of it.
    ///
    /// The executor evaluates backoffs against the context of the upcoming attempt, whose index
    /// is at least 1. Wrapping `exponential(100ms, 2.0)` therefore yields 100ms, 200ms, 400ms
    /// instead of 200ms, 400ms, 800ms. Nesting this decorator twice makes the inner one see
    /// index 0 for the first retry, which is how a chained configuration gets a zero delay
    /// in front of the wrapped schedule.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use persevere::{Backoff, RetryContext};
    ///
    /// let base = Backoff::exponential(Duration::from_millis(100), 2.0);
    /// let shifted = base.with_first_retry_no_delay();
    ///
    /// let first = RetryContext::<()>::new();
    /// let retry_1 = first.next_retry(());
    /// let retry_2 = retry_1.next_retry(());
    ///
    /// assert_eq!(shifted.delay_millis(&first), 0);
    /// assert_eq!(shifted.delay_millis(&retry_1), 100);
    /// assert_eq!(shifted.delay_millis(&retry_2), 200);
    /// assert_eq!(base.delay_millis(&retry_2), 400);
    /// ```
    #[must_use]
    pub fn with_first_retry_no_delay(&self) -> Self {
        Self::from_strategy(Strategy::FirstRetryNoDelay { target: self.clone() })
    }

    /// Computes the delay, in milliseconds, that precedes the attempt described by `context`.
    #[must_use]
    #[expect(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        reason = "delays are far below 2^53 ms and float-to-int casts saturate"
    )]
    pub fn delay_millis<E>(&self, context: &RetryContext<E>) -> i64 {
        match &*self.0 {
            Strategy::FixedInterval { interval_millis } => *interval_millis,
            Strategy::Exponential { initial_millis, multiplier } => {
                let exponent = i32::try_from(context.attempt_index()).unwrap_or(i32::MAX);
                (*initial_millis as f64 * multiplier.powi(exponent)) as i64
            }
            Strategy::UniformJitter { target, range_millis, sampler } => {
                let offset = (*range_millis as f64 * sampler.signed_unit()) as i64;
                target.delay_millis(context).saturating_add(offset)
            }
            Strategy::ProportionalJitter { target, multiplier, sampler } => {
                let delay = target.delay_millis(context);
                (delay as f64 * multiplier.mul_add(sampler.signed_unit(), 1.0)) as i64
            }
            Strategy::MinDelay { target, min_millis } => target.delay_millis(context).max(*min_millis),
            Strategy::MaxDelay { target, max_millis } => target.delay_millis(context).min(*max_millis),
            Strategy::FirstRetryNoDelay { target } => {
                if context.is_first_retry() {
                    0
                } else {
                    target.delay_millis(&context.prev_retry())
                }
            }
        }
    }

    fn from_strategy(strategy: Strategy) -> Self {
        Self(Arc::new(strategy))
    }

    fn uniform_jitter_with(&self, range: Duration, sampler: Sampler) -> Self {
        Self::from_strategy(Strategy::UniformJitter {
            target: self.clone(),
            range_millis: duration_to_millis(range),
            sampler,
        })
    }

    fn proportional_jitter_with(&self, multiplier: f64, sampler: Sampler) -> Self {
        Self::from_strategy(Strategy::ProportionalJitter {
            target: self.clone(),
            multiplier,
            sampler,
        })
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::fixed(DEFAULT_FIXED_INTERVAL)
    }
}

pub(crate) fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
