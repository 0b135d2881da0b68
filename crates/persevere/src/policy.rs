// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;

use crate::constants::DEFAULT_MAX_RETRIES;
use crate::{Classify, FailureKind, RetryContext};

/// Decides whether a failed attempt gets a successor.
///
/// The policy sees the context of the attempt that *would* run next, so with
/// `max_retries = N` an operation that always fails with a retryable kind runs `N + 1` times.
///
/// # Examples
///
/// ```
/// use persevere::{FailureKind, RetryContext, RetryPolicy};
///
/// let policy = RetryPolicy::new(1).retry_on([FailureKind::Transient]);
///
/// let second = RetryContext::new().next_retry(FailureKind::Transient);
/// assert!(policy.should_continue(&second));
///
/// let third = second.next_retry(FailureKind::Transient);
/// assert!(!policy.should_continue(&third));
///
/// let rejected = RetryContext::new().next_retry(FailureKind::Permanent);
/// assert!(!policy.should_continue(&rejected));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_on: BTreeSet<FailureKind>,
}

impl RetryPolicy {
    /// Allows up to `max_retries` retries of any failure kind.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_on: BTreeSet::new(),
        }
    }

    /// Retries until the operation succeeds or aborts.
    #[must_use]
    pub fn infinite() -> Self {
        Self::new(u32::MAX)
    }

    /// Never retries.
    #[must_use]
    pub fn never() -> Self {
        Self::new(0)
    }

    /// Restricts retries to the listed kinds; any other kind is fatal on first sight.
    ///
    /// An empty list removes the restriction.
    #[must_use]
    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.retry_on = kinds.into_iter().collect();
        self
    }

    /// Returns the retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the kinds eligible for retry, or an empty iterator when every kind is.
    pub fn retryable_kinds(&self) -> impl Iterator<Item = FailureKind> + '_ {
        self.retry_on.iter().copied()
    }

    /// Returns `true` when the attempt described by `next` may run.
    ///
    /// `next` must come from [`RetryContext::next_retry`]; a context without a cause is
    /// judged on the budget alone.
    #[must_use]
    pub fn should_continue<E: Classify>(&self, next: &RetryContext<E>) -> bool {
        next.attempt_index() <= self.max_retries
            && next.last_cause().is_none_or(|cause| self.is_retryable(cause.failure_kind()))
    }

    pub(crate) fn is_retryable(&self, kind: FailureKind) -> bool {
        self.retry_on.is_empty() || self.retry_on.contains(&kind)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn failed(times: u32, kind: FailureKind) -> RetryContext<FailureKind> {
        (0..times).fold(RetryContext::new(), |context, _| context.next_retry(kind))
    }

    #[test]
    fn default_allows_three_retries() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.retryable_kinds().count(), 0);
        assert!(policy.should_continue(&failed(3, FailureKind::Permanent)));
        assert!(!policy.should_continue(&failed(4, FailureKind::Permanent)));
    }

    #[rstest]
    #[case(0, 1, false)]
    #[case(1, 1, true)]
    #[case(1, 2, false)]
    #[case(5, 5, true)]
    #[case(5, 6, false)]
    fn budget_counts_retries(#[case] max_retries: u32, #[case] failures: u32, #[case] expected: bool) {
        let policy = RetryPolicy::new(max_retries);

        assert_eq!(policy.should_continue(&failed(failures, FailureKind::Transient)), expected);
    }

    #[test]
    fn infinite_and_never() {
        assert!(RetryPolicy::infinite().should_continue(&failed(1000, FailureKind::Transient)));
        assert!(!RetryPolicy::never().should_continue(&failed(1, FailureKind::Transient)));
    }

    #[rstest]
    #[case(FailureKind::Transient, true)]
    #[case(FailureKind::RateLimited, true)]
    #[case(FailureKind::Permanent, false)]
    fn filter_limits_kinds(#[case] kind: FailureKind, #[case] expected: bool) {
        let policy = RetryPolicy::new(10).retry_on([FailureKind::Transient, FailureKind::RateLimited]);

        assert_eq!(policy.should_continue(&failed(1, kind)), expected);
    }

    #[test]
    fn empty_filter_clears_restriction() {
        let policy = RetryPolicy::new(2).retry_on([FailureKind::Transient]).retry_on([]);

        assert!(policy.should_continue(&failed(1, FailureKind::Permanent)));
    }
}
