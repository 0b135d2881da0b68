// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_channel::oneshot;
use tracing::Level;

use crate::backoff::duration_to_millis;
use crate::handle::Cancellation;
use crate::job::{Promise, RetryJob};
use crate::operation::Operation;
use crate::queue::{DelayQueue, Job, TimerQueue};
use crate::telemetry::RATE_LIMITED_EVENT;
use crate::{Backoff, BackoffConfig, Classify, ConfigError, FailureKind, RetryConfig, RetryContext, RetryHandle, RetryPolicy};

/// Runs operations until they succeed, abort, or exhaust their retry budget.
///
/// An executor is an immutable bundle of a [`Backoff`], a [`RetryPolicy`], the rate mode, and a
/// shared [`DelayQueue`]. Configuration methods consume the executor and return a reconfigured
/// one; clone first to branch several configurations off a common base. Clones share the
/// queue.
///
/// Each call returns a [`RetryHandle`] right away. The first attempt is queued with no delay;
/// every later attempt is queued by its predecessor once that predecessor has failed, so the
/// attempts of one call never overlap.
///
/// # Defaults
///
/// | Setting | Default |
/// |---------|---------|
/// | Backoff | fixed, 1 second |
/// | Retries | 3 (4 attempts in total) |
/// | Retried kinds | all |
/// | Rate mode | fixed delay (end-to-start) |
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use persevere::{FailureKind, RetryExecutor};
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let executor = RetryExecutor::new_tokio()
///     .with_exponential_backoff(Duration::from_millis(100), 2.0)
///     .with_max_delay(Duration::from_secs(2))
///     .with_max_retries(5)
///     .retry_on([FailureKind::Transient, FailureKind::RateLimited]);
///
/// let value = executor
///     .get_with_retry_context(|context| match context.attempt_index() {
///         0 | 1 => Err(FailureKind::Transient),
///         n => Ok(n),
///     })
///     .await;
///
/// assert_eq!(value, Ok(2));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    queue: Arc<dyn DelayQueue>,
    backoff: Backoff,
    rate_limit_backoff: Option<Backoff>,
    policy: RetryPolicy,
    fixed_rate: bool,
}

impl RetryExecutor {
    /// Creates an executor with default settings that schedules attempts on `queue`.
    #[must_use]
    pub fn new(queue: impl DelayQueue + 'static) -> Self {
        Self {
            queue: Arc::new(queue),
            backoff: Backoff::default(),
            rate_limit_backoff: None,
            policy: RetryPolicy::default(),
            fixed_rate: false,
        }
    }

    /// Creates an executor with default settings backed by a [`TimerQueue`] on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    #[must_use]
    pub fn new_tokio() -> Self {
        Self::new(TimerQueue::new())
    }

    /// Creates an executor from serialized settings.
    ///
    /// # Errors
    ///
    /// Returns an error when [`RetryConfig::validate`] rejects the configuration.
    pub fn from_config(config: &RetryConfig, queue: impl DelayQueue + 'static) -> Result<Self, ConfigError> {
        let backoff = config.backoff.build()?;
        let rate_limit_backoff = config.rate_limit_backoff.as_ref().map(BackoffConfig::build).transpose()?;

        Ok(Self {
            queue: Arc::new(queue),
            backoff,
            rate_limit_backoff,
            policy: config.policy(),
            fixed_rate: config.fixed_rate,
        })
    }

    /// Waits `delay` before every retry.
    #[must_use]
    pub fn with_fixed_backoff(self, delay: Duration) -> Self {
        self.with_backoff(Backoff::fixed(delay))
    }

    /// Waits `initial * multiplier^attempt_index` before a retry.
    #[must_use]
    pub fn with_exponential_backoff(self, initial: Duration, multiplier: f64) -> Self {
        self.with_backoff(Backoff::exponential(initial, multiplier))
    }

    /// Retries without waiting.
    #[must_use]
    pub fn with_no_delay(self) -> Self {
        self.with_backoff(Backoff::no_delay())
    }

    /// Replaces the backoff.
    #[must_use]
    pub fn with_backoff(self, backoff: Backoff) -> Self {
        Self { backoff, ..self }
    }

    /// Adds uniform jitter of `±range` to the current backoff.
    #[must_use]
    pub fn with_uniform_jitter(self, range: Duration) -> Self {
        let backoff = self.backoff.with_uniform_jitter(range);
        self.with_backoff(backoff)
    }

    /// Adds proportional jitter of `±multiplier` to the current backoff.
    #[must_use]
    pub fn with_proportional_jitter(self, multiplier: f64) -> Self {
        let backoff = self.backoff.with_proportional_jitter(multiplier);
        self.with_backoff(backoff)
    }

    /// Raises every delay of the current backoff to at least `min`.
    #[must_use]
    pub fn with_min_delay(self, min: Duration) -> Self {
        let backoff = self.backoff.with_min_delay(min);
        self.with_backoff(backoff)
    }

    /// Caps every delay of the current backoff at `max`.
    #[must_use]
    pub fn with_max_delay(self, max: Duration) -> Self {
        let backoff = self.backoff.with_max_delay(max);
        self.with_backoff(backoff)
    }

    /// Wraps the current backoff with [`Backoff::with_first_retry_no_delay`].
    #[must_use]
    pub fn first_retry_no_delay(self) -> Self {
        let backoff = self.backoff.with_first_retry_no_delay();
        self.with_backoff(backoff)
    }

    /// Uses `backoff` instead of the regular one after a [`FailureKind::RateLimited`] attempt.
    ///
    /// Rate-limited failures still go through the policy; this only changes how long the
    /// executor waits before the next attempt.
    #[must_use]
    pub fn with_rate_limit_backoff(self, backoff: Backoff) -> Self {
        Self {
            rate_limit_backoff: Some(backoff),
            ..self
        }
    }

    /// Spaces attempts start-to-start: the time an attempt took is subtracted from the delay
    /// that follows it.
    ///
    /// When an attempt takes longer than the delay, the next one starts right away.
    #[must_use]
    pub fn with_fixed_rate(self) -> Self {
        Self { fixed_rate: true, ..self }
    }

    /// Spaces attempts end-to-start, the default.
    #[must_use]
    pub fn with_fixed_delay(self) -> Self {
        Self { fixed_rate: false, ..self }
    }

    /// Allows up to `max_retries` retries after the first attempt.
    #[must_use]
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        let policy = RetryPolicy::new(max_retries).retry_on(self.policy.retryable_kinds());
        Self { policy, ..self }
    }

    /// Retries until the operation succeeds or aborts.
    #[must_use]
    pub fn retry_infinitely(self) -> Self {
        self.with_max_retries(u32::MAX)
    }

    /// Runs every operation exactly once.
    #[must_use]
    pub fn dont_retry(self) -> Self {
        self.with_max_retries(0)
    }

    /// Retries only the listed kinds; every other failure completes the call immediately.
    #[must_use]
    pub fn retry_on(self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        let policy = self.policy.clone().retry_on(kinds);
        Self { policy, ..self }
    }

    /// Returns the backoff applied between attempts.
    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Returns the backoff applied after rate-limited attempts, if one is configured.
    #[must_use]
    pub fn rate_limit_backoff(&self) -> Option<&Backoff> {
        self.rate_limit_backoff.as_ref()
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns `true` when attempts are spaced start-to-start.
    #[must_use]
    pub fn is_fixed_rate(&self) -> bool {
        self.fixed_rate
    }

    /// Runs a context-aware action that produces no value.
    pub fn do_with_retry<E, F>(&self, action: F) -> RetryHandle<(), E>
    where
        F: Fn(&RetryContext<E>) -> Result<(), E> + Send + Sync + 'static,
        E: Classify + Debug + Send + Sync + 'static,
    {
        self.submit(Operation::from_sync(action))
    }

    /// Runs an operation that does not care which attempt it is.
    pub fn get_with_retry<T, E, F>(&self, operation: F) -> RetryHandle<T, E>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: Classify + Debug + Send + Sync + 'static,
    {
        self.submit(Operation::from_sync(move |_: &RetryContext<E>| operation()))
    }

    /// Runs an operation that receives the context of the current attempt.
    pub fn get_with_retry_context<T, E, F>(&self, operation: F) -> RetryHandle<T, E>
    where
        F: Fn(&RetryContext<E>) -> Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: Classify + Debug + Send + Sync + 'static,
    {
        self.submit(Operation::from_sync(operation))
    }

    /// Runs an asynchronous operation.
    ///
    /// A failure of the returned future is handled exactly like a synchronous failure. The
    /// future must own what it needs from the context, since the context only lives for the
    /// call that created the future.
    ///
    /// # Examples
    ///
    /// ```
    /// use persevere::{FailureKind, RetryExecutor};
    ///
    /// # #[tokio::main(flavor = "current_thread", start_paused = true)]
    /// # async fn main() {
    /// let executor = RetryExecutor::new_tokio();
    ///
    /// let value = executor
    ///     .get_future_with_retry(|context| {
    ///         let attempt = context.attempt_index();
    ///         async move { if attempt == 0 { Err(FailureKind::Transient) } else { Ok("sheet row") } }
    ///     })
    ///     .await;
    ///
    /// assert_eq!(value, Ok("sheet row"));
    /// # }
    /// ```
    pub fn get_future_with_retry<T, E, F, Fut>(&self, operation: F) -> RetryHandle<T, E>
    where
        F: Fn(&RetryContext<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Classify + Debug + Send + Sync + 'static,
    {
        self.submit(Operation::from_async(operation))
    }

    fn submit<T, E>(&self, operation: Operation<T, E>) -> RetryHandle<T, E>
    where
        T: Send + 'static,
        E: Classify + Debug + Send + Sync + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let cancellation = Cancellation::default();
        let promise = Promise::new(sender, cancellation.clone());
        let job = RetryJob::new(RetryContext::new(), operation, promise, Arc::new(self.clone()));

        self.queue.schedule(0, Job::cancellable(cancellation.clone(), async move {
            job.run().await;
        }));

        RetryHandle::new(receiver, cancellation, self.queue())
    }

    pub(crate) fn queue(&self) -> Arc<dyn DelayQueue> {
        Arc::clone(&self.queue)
    }

    /// Returns the delay before the attempt described by `next`, or `None` when it must not run.
    ///
    /// `elapsed` is how long the failed attempt took.
    pub(crate) fn decide<E: Classify>(&self, kind: FailureKind, next: &RetryContext<E>, elapsed: Duration) -> Option<i64> {
        let backoff = if kind == FailureKind::RateLimited {
            tracing::event!(
                name: RATE_LIMITED_EVENT,
                Level::DEBUG,
                retry.attempt.index = next.attempt_index().saturating_sub(1),
                retry.rate_limit_backoff = self.rate_limit_backoff.is_some(),
            );
            self.rate_limit_backoff.as_ref().unwrap_or(&self.backoff)
        } else {
            &self.backoff
        };

        if !self.policy.should_continue(next) {
            return None;
        }

        let delay = backoff.delay_millis(next);
        if self.fixed_rate {
            Some(delay.saturating_sub(duration_to_millis(elapsed)))
        } else {
            Some(delay)
        }
    }
}
