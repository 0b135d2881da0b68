// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Names of the `tracing` events emitted by the executor.
//!
//! Event fields use the `retry.*` prefix: `retry.attempt.index` is the zero-based index of the
//! attempt that just ran, `retry.delay` and `retry.elapsed` are milliseconds, and
//! `retry.failure.kind` is the [`FailureKind`][crate::FailureKind] name.

/// A failed attempt got a successor (WARN).
pub const RETRY_EVENT: &str = "persevere.retry";

/// An attempt succeeded and completed its call (TRACE).
pub const SUCCESS_EVENT: &str = "persevere.success";

/// The retry budget or filter rejected a failure; the call completes with it (INFO).
pub const EXHAUSTED_EVENT: &str = "persevere.exhausted";

/// An attempt asked to abort; the call completes with the earliest real failure (INFO).
pub const ABORTED_EVENT: &str = "persevere.aborted";

/// An attempt was rate limited by the remote service (DEBUG).
pub const RATE_LIMITED_EVENT: &str = "persevere.rate_limited";

/// Classifying a failure or computing its delay panicked (ERROR).
pub const DECISION_FAILED_EVENT: &str = "persevere.decision_failed";

/// The call was cancelled before a scheduled attempt started (DEBUG).
pub const CANCELLED_EVENT: &str = "persevere.cancelled";

/// The timer task is gone and a job was dropped unscheduled (ERROR).
pub const QUEUE_CLOSED_EVENT: &str = "persevere.queue_closed";
