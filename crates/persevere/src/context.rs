// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use tokio::time::Instant;

/// Immutable state describing one attempt of a logical call.
///
/// A context is created once per logical call with [`attempt_index`][Self::attempt_index] `0`
/// and no cause. Every failed attempt derives a fresh context through
/// [`next_retry`][Self::next_retry]; the previous one is never modified.
///
/// Operations and backoffs only ever observe a context by reference.
///
/// # Examples
///
/// ```
/// use persevere::RetryContext;
///
/// let first = RetryContext::<std::io::Error>::new();
/// assert_eq!(first.attempt_index(), 0);
/// assert!(first.is_first_retry());
/// assert!(first.last_cause().is_none());
///
/// let second = first.next_retry(std::io::Error::other("quota exceeded"));
/// assert_eq!(second.attempt_index(), 1);
/// assert_eq!(second.last_cause().unwrap().to_string(), "quota exceeded");
/// ```
#[derive(Debug)]
pub struct RetryContext<E> {
    attempt_index: u32,
    started_at: Instant,
    // Shared only with the short-lived contexts produced by `prev_retry`.
    last_cause: Option<Arc<E>>,
}

impl<E> RetryContext<E> {
    /// Creates the context of the first attempt of a logical call started now.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub(crate) fn starting_at(started_at: Instant) -> Self {
        Self {
            attempt_index: 0,
            started_at,
            last_cause: None,
        }
    }

    /// Returns the zero-based index of the attempt this context describes.
    #[must_use]
    pub fn attempt_index(&self) -> u32 {
        self.attempt_index
    }

    /// Returns the instant the logical call was submitted.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the failure of the previous attempt, if there was one.
    #[must_use]
    pub fn last_cause(&self) -> Option<&E> {
        self.last_cause.as_deref()
    }

    /// Returns `true` when the attempt index is zero.
    #[must_use]
    pub fn is_first_retry(&self) -> bool {
        self.attempt_index == 0
    }

    /// Derives the context of the attempt that follows a failure with `cause`.
    #[must_use]
    pub fn next_retry(&self, cause: E) -> Self {
        Self {
            attempt_index: self.attempt_index.saturating_add(1),
            started_at: self.started_at,
            last_cause: Some(Arc::new(cause)),
        }
    }

    /// Derives a context one attempt earlier with the same cause.
    ///
    /// Only backoff decorators use this to realign attempt counts for the strategy they wrap.
    pub(crate) fn prev_retry(&self) -> Self {
        Self {
            attempt_index: self.attempt_index.saturating_sub(1),
            started_at: self.started_at,
            last_cause: self.last_cause.clone(),
        }
    }

    /// Consumes the context and hands back ownership of its cause.
    ///
    /// # Panics
    ///
    /// Panics if a context produced by [`prev_retry`][Self::prev_retry] is still alive,
    /// which cannot happen outside of backoff evaluation.
    pub(crate) fn into_last_cause(self) -> Option<E> {
        self.last_cause
            .map(|cause| Arc::into_inner(cause).expect("backoff evaluation must not outlive the decision that started it"))
    }
}

impl<E> Default for RetryContext<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_context_has_no_cause() {
        let context = RetryContext::<String>::new();

        assert_eq!(context.attempt_index(), 0);
        assert!(context.is_first_retry());
        assert!(context.last_cause().is_none());
    }

    #[test]
    fn next_retry_stores_cause_and_keeps_start() {
        let first = RetryContext::new();
        let second = first.next_retry("timeout".to_string());
        let third = second.next_retry("quota".to_string());

        assert_eq!(second.attempt_index(), 1);
        assert_eq!(second.last_cause().map(String::as_str), Some("timeout"));
        assert_eq!(third.attempt_index(), 2);
        assert_eq!(third.last_cause().map(String::as_str), Some("quota"));
        assert_eq!(third.started_at(), first.started_at());
        assert!(!third.is_first_retry());

        // the source contexts are untouched
        assert_eq!(first.attempt_index(), 0);
        assert!(first.last_cause().is_none());
    }

    #[test]
    fn next_then_prev_round_trips_index() {
        let context = RetryContext::new().next_retry(1).next_retry(2);

        let back = context.next_retry(3).prev_retry();
        assert_eq!(back.attempt_index(), context.attempt_index());
        assert_eq!(back.last_cause(), Some(&3));

        let forward = context.prev_retry().next_retry(4);
        assert_eq!(forward.attempt_index(), context.attempt_index());
    }

    #[test]
    fn prev_retry_saturates_at_zero() {
        let context = RetryContext::<u8>::new().prev_retry();

        assert_eq!(context.attempt_index(), 0);
    }

    #[test]
    fn into_last_cause_returns_owned_cause() {
        let context = RetryContext::new().next_retry(vec![1, 2, 3]);
        {
            let _realigned = context.prev_retry();
        }

        assert_eq!(context.into_last_cause(), Some(vec![1, 2, 3]));
        assert_eq!(RetryContext::<u8>::new().into_last_cause(), None);
    }
}
