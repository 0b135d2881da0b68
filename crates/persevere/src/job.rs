// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures_channel::oneshot;
use futures_core::future::BoxFuture;
use tokio::time::Instant;
use tracing::Level;

use crate::backoff::duration_to_millis;
use crate::handle::Cancellation;
use crate::operation::Operation;
use crate::queue::Job;
use crate::telemetry::{ABORTED_EVENT, CANCELLED_EVENT, DECISION_FAILED_EVENT, EXHAUSTED_EVENT, RETRY_EVENT, SUCCESS_EVENT};
use crate::{Classify, RetryContext, RetryExecutor};

/// How a single job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobOutcome {
    /// The attempt succeeded and completed the call.
    Succeeded,
    /// The attempt failed and a successor is queued.
    RetryScheduled,
    /// The attempt aborted and completed the call.
    Aborted,
    /// The policy rejected the failure and the call completed with it.
    Exhausted,
    /// Classification or delay computation panicked; the call completed with the failure.
    DecisionFailed,
    /// The call was cancelled; the operation was not invoked or no successor was queued.
    Cancelled,
}

/// The completion side of a call; completed at most once.
#[derive(Debug)]
pub(crate) struct Promise<T, E> {
    sender: oneshot::Sender<Result<T, E>>,
    cancellation: Cancellation,
}

impl<T, E> Promise<T, E> {
    pub(crate) fn new(sender: oneshot::Sender<Result<T, E>>, cancellation: Cancellation) -> Self {
        Self { sender, cancellation }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    fn complete(self, result: Result<T, E>) {
        // A detached handle no longer listens.
        let _ = self.sender.send(result);
    }
}

/// One attempt of a logical call.
///
/// A job runs its operation once. On a retryable failure it hands a successor carrying the
/// derived context to the executor's queue; every other outcome completes the promise.
#[derive(Debug)]
pub(crate) struct RetryJob<T, E> {
    context: RetryContext<E>,
    operation: Operation<T, E>,
    promise: Promise<T, E>,
    executor: Arc<RetryExecutor>,
}

impl<T, E> RetryJob<T, E>
where
    T: Send + 'static,
    E: Classify + Debug + Send + Sync + 'static,
{
    pub(crate) fn new(context: RetryContext<E>, operation: Operation<T, E>, promise: Promise<T, E>, executor: Arc<RetryExecutor>) -> Self {
        Self {
            context,
            operation,
            promise,
            executor,
        }
    }

    /// Runs the attempt and drives the call to its next state.
    pub(crate) fn run(self) -> BoxFuture<'static, JobOutcome> {
        Box::pin(self.execute())
    }

    async fn execute(self) -> JobOutcome {
        let Self {
            context,
            operation,
            promise,
            executor,
        } = self;
        let attempt_index = context.attempt_index();

        if promise.is_cancelled() {
            tracing::event!(name: CANCELLED_EVENT, Level::DEBUG, retry.attempt.index = attempt_index);
            return JobOutcome::Cancelled;
        }

        let attempt_start = Instant::now();
        let result = operation.call(&context).await;
        let elapsed = attempt_start.elapsed();

        let cause = match result {
            Ok(value) => {
                tracing::event!(
                    name: SUCCESS_EVENT,
                    Level::TRACE,
                    retry.attempt.index = attempt_index,
                    retry.elapsed = duration_to_millis(elapsed),
                );
                promise.complete(Ok(value));
                return JobOutcome::Succeeded;
            }
            Err(cause) => cause,
        };

        let Ok(kind) = catch_unwind(AssertUnwindSafe(|| cause.failure_kind())) else {
            report_decision_failure(attempt_index, &cause);
            promise.complete(Err(cause));
            return JobOutcome::DecisionFailed;
        };

        if kind.is_abort() {
            tracing::event!(
                name: ABORTED_EVENT,
                Level::INFO,
                retry.attempt.index = attempt_index,
                retry.cause = ?cause,
            );
            let earlier = context.into_last_cause();
            promise.complete(Err(earlier.unwrap_or(cause)));
            return JobOutcome::Aborted;
        }

        let next = context.next_retry(cause);
        let decision = catch_unwind(AssertUnwindSafe(|| executor.decide(kind, &next, elapsed)));

        match decision {
            Ok(Some(_)) if promise.is_cancelled() => {
                tracing::event!(name: CANCELLED_EVENT, Level::DEBUG, retry.attempt.index = attempt_index);
                JobOutcome::Cancelled
            }
            Ok(Some(delay_millis)) => {
                tracing::event!(
                    name: RETRY_EVENT,
                    Level::WARN,
                    retry.attempt.index = attempt_index,
                    retry.failure.kind = kind.as_str(),
                    retry.delay = delay_millis,
                    retry.elapsed = duration_to_millis(elapsed),
                    retry.cause = ?next.last_cause(),
                );

                let queue = executor.queue();
                let cancellation = promise.cancellation.clone();
                let successor = Self::new(next, operation, promise, executor);
                queue.schedule(delay_millis, Job::cancellable(cancellation, async move {
                    successor.run().await;
                }));
                JobOutcome::RetryScheduled
            }
            Ok(None) => {
                let cause = take_cause(next);
                tracing::event!(
                    name: EXHAUSTED_EVENT,
                    Level::INFO,
                    retry.attempt.index = attempt_index,
                    retry.failure.kind = kind.as_str(),
                    retry.cause = ?cause,
                );
                promise.complete(Err(cause));
                JobOutcome::Exhausted
            }
            Err(_) => {
                let cause = take_cause(next);
                report_decision_failure(attempt_index, &cause);
                promise.complete(Err(cause));
                JobOutcome::DecisionFailed
            }
        }
    }
}

fn take_cause<E>(next: RetryContext<E>) -> E {
    next.into_last_cause()
        .expect("a context derived from a failure must carry that failure")
}

fn report_decision_failure<E: Debug>(attempt_index: u32, cause: &E) {
    tracing::event!(
        name: DECISION_FAILED_EVENT,
        Level::ERROR,
        retry.attempt.index = attempt_index,
        retry.cause = ?cause,
    );
}
