// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Display, Formatter};
use std::io::ErrorKind;

use serde::{Deserialize, Serialize};

/// Closed classification of a failed attempt.
///
/// The remote-call layer classifies its own failures through [`Classify`] before they reach the
/// retry policy, so the executor never has to guess which vendor-specific errors are retryable.
///
/// # Examples
///
/// ```
/// use persevere::FailureKind;
///
/// assert!(FailureKind::Aborted.is_abort());
/// assert_eq!(FailureKind::RateLimited.to_string(), "rate_limited");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A temporary failure, such as a timeout or a dropped connection.
    Transient,

    /// The remote service rejected the call because of its request quota (HTTP 429).
    RateLimited,

    /// A failure that repeating the call will not fix.
    Permanent,

    /// The operation asked to stop retrying immediately.
    ///
    /// Aborts bypass the retry policy and the backoff. When an earlier attempt already failed,
    /// the call completes with that earlier failure instead of the abort.
    Aborted,
}

impl FailureKind {
    /// Returns `true` for [`FailureKind::Aborted`].
    #[must_use]
    pub fn is_abort(self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Returns the `snake_case` name used in logs and configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::Permanent => "permanent",
            Self::Aborted => "aborted",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types that can classify themselves as a [`FailureKind`].
///
/// Implement this for the error type of the operations you run through the
/// [`RetryExecutor`][crate::RetryExecutor].
///
/// # Examples
///
/// ```
/// use persevere::{Classify, FailureKind};
///
/// #[derive(Debug)]
/// enum SheetError {
///     Status(u16),
///     Cancelled,
/// }
///
/// impl Classify for SheetError {
///     fn failure_kind(&self) -> FailureKind {
///         match self {
///             Self::Status(429) => FailureKind::RateLimited,
///             Self::Status(500..=599) => FailureKind::Transient,
///             Self::Status(_) => FailureKind::Permanent,
///             Self::Cancelled => FailureKind::Aborted,
///         }
///     }
/// }
///
/// assert_eq!(SheetError::Status(429).failure_kind(), FailureKind::RateLimited);
/// ```
pub trait Classify {
    /// Returns the classification of this failure.
    fn failure_kind(&self) -> FailureKind;
}

impl Classify for FailureKind {
    fn failure_kind(&self) -> FailureKind {
        *self
    }
}

impl Classify for std::io::Error {
    fn failure_kind(&self) -> FailureKind {
        match self.kind() {
            ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::UnexpectedEof => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }
}
