// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures_channel::oneshot;

use crate::queue::DelayQueue;

/// The eventual result of a call submitted to a [`RetryExecutor`][crate::RetryExecutor].
///
/// Await the handle to get the value of the first successful attempt, or the failure that
/// ended the call. Failures are the operation's own error values, never wrapped.
///
/// Dropping the handle detaches the call: it keeps running to completion and its result is
/// discarded. Use [`cancel`][Self::cancel] to stop it instead.
///
/// # Panics
///
/// Awaiting the handle panics when the call ended without a result, which happens only when
/// the operation itself panicked or the runtime shut down with an attempt still queued.
pub struct RetryHandle<T, E> {
    receiver: oneshot::Receiver<Result<T, E>>,
    cancellation: Cancellation,
    queue: Arc<dyn DelayQueue>,
}

impl<T, E> RetryHandle<T, E> {
    pub(crate) fn new(receiver: oneshot::Receiver<Result<T, E>>, cancellation: Cancellation, queue: Arc<dyn DelayQueue>) -> Self {
        Self {
            receiver,
            cancellation,
            queue,
        }
    }

    /// Cancels the call.
    ///
    /// Attempts that have not started yet never invoke the operation, and the queue is asked
    /// to drop them right away. An attempt that is already running is not interrupted.
    pub fn cancel(self) {
        self.cancellation.cancel();
        self.queue.discard_cancelled();
    }
}

impl<T, E> Future for RetryHandle<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.expect("retry call ended without a result: the operation panicked or its runtime shut down"))
    }
}

impl<T, E> Debug for RetryHandle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryHandle")
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Cancellation state shared by a handle and every job of its call.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
