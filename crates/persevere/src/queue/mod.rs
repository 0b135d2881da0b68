// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Delayed execution of retry attempts.
//!
//! Every attempt after the first one reaches the runtime through a [`DelayQueue`]. The executor
//! owns one queue and shares it with all jobs it issues, so a single timer serves every call
//! in flight.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::future::BoxFuture;

use crate::handle::Cancellation;

#[cfg(any(feature = "test-util", test))]
mod manual;
mod timer;

#[cfg(any(feature = "test-util", test))]
pub use manual::ManualQueue;
pub use timer::TimerQueue;

/// Runs jobs after a delay.
///
/// Implementations must eventually run every scheduled job unless the queue itself is shut
/// down. A delay of zero or below means "as soon as possible". Jobs scheduled with equal
/// deadlines run in submission order.
pub trait DelayQueue: Debug + Send + Sync {
    /// Schedules `job` to run `delay_millis` milliseconds from now.
    fn schedule(&self, delay_millis: i64, job: Job);

    /// Drops pending jobs whose call has been cancelled.
    ///
    /// Invoked by [`RetryHandle::cancel`][crate::RetryHandle::cancel]. The default keeps them
    /// queued; a cancelled job finishes without invoking its operation once it runs.
    fn discard_cancelled(&self) {}
}

/// A type-erased unit of work handed to a [`DelayQueue`].
///
/// Jobs issued by an executor belong to a call and report [`is_cancelled`][Self::is_cancelled]
/// once that call is cancelled. Queues may drop such jobs instead of running them.
pub struct Job {
    future: BoxFuture<'static, ()>,
    cancellation: Option<Cancellation>,
}

impl Job {
    /// Wraps a future so it can be scheduled.
    pub fn new(future: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            future: Box::pin(future),
            cancellation: None,
        }
    }

    pub(crate) fn cancellable(cancellation: Cancellation, future: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            future: Box::pin(future),
            cancellation: Some(cancellation),
        }
    }

    /// Returns `true` when the call this job belongs to has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(Cancellation::is_cancelled)
    }
}

impl Future for Job {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.future.as_mut().poll(cx)
    }
}

impl Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}
