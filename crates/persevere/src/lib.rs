// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(
    not(feature = "test-util"),
    expect(rustdoc::broken_intra_doc_links, reason = "ManualQueue only exists with the test-util feature")
)]

//! Retries for calls to rate-limited remote services.
//!
//! Remote APIs such as hosted spreadsheets enforce per-user request quotas and answer with
//! transient failures under load. This crate runs such calls through a [`RetryExecutor`] that
//! spaces repeated attempts with a composable [`Backoff`], decides eligibility with a
//! [`RetryPolicy`], and hands the caller a [`RetryHandle`] that resolves to the first success
//! or to the failure that ended the call.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use persevere::{Classify, FailureKind, RetryExecutor};
//!
//! #[derive(Debug, PartialEq)]
//! enum SheetError {
//!     Status(u16),
//! }
//!
//! impl Classify for SheetError {
//!     fn failure_kind(&self) -> FailureKind {
//!         match self {
//!             Self::Status(429) => FailureKind::RateLimited,
//!             Self::Status(500..=599) => FailureKind::Transient,
//!             Self::Status(_) => FailureKind::Permanent,
//!         }
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() {
//! let executor = RetryExecutor::new_tokio()
//!     .with_exponential_backoff(Duration::from_millis(500), 2.0)
//!     .with_proportional_jitter(0.1)
//!     .with_max_delay(Duration::from_secs(30))
//!     .with_max_retries(5)
//!     .retry_on([FailureKind::Transient, FailureKind::RateLimited]);
//!
//! let cells = executor
//!     .get_with_retry_context(|context| {
//!         if context.attempt_index() < 2 {
//!             Err(SheetError::Status(429))
//!         } else {
//!             Ok(vec!["A1", "B1"])
//!         }
//!     })
//!     .await;
//!
//! assert_eq!(cells, Ok(vec!["A1", "B1"]));
//!
//! // Permanent failures are not in the retry list and end the call on first sight.
//! let missing = executor.get_with_retry(|| Err::<(), _>(SheetError::Status(404))).await;
//! assert_eq!(missing, Err(SheetError::Status(404)));
//! # }
//! ```
//!
//! # Failure Handling
//!
//! Every failure is classified through [`Classify`] into a [`FailureKind`]:
//!
//! - [`FailureKind::Aborted`] ends the call at once. If an earlier attempt already failed,
//!   the call completes with that earlier failure, since it describes the real problem.
//! - Every other kind is offered to the [`RetryPolicy`]. When it allows another attempt, the
//!   [`Backoff`] decides how long to wait. Otherwise the call completes with the failure as is.
//! - [`FailureKind::RateLimited`] is logged and treated like any other kind, except that
//!   [`RetryExecutor::with_rate_limit_backoff`] can give it its own, usually longer, backoff.
//!
//! The executor never wraps the operation's error type.
//!
//! # Scheduling
//!
//! Attempts run on a [`DelayQueue`]. [`TimerQueue`] serves a tokio runtime with a single timer
//! task; with the `test-util` feature, [`ManualQueue`] records delays and runs attempts only
//! when a test asks it to. Attempts of one call never overlap, and nothing bounds how long a
//! single attempt may run.
//!
//! # Telemetry
//!
//! The executor emits `tracing` events; the [`telemetry`] module lists their names and fields.
//!
//! # Features
//!
//! - **`test-util`** - Exposes [`ManualQueue`].

mod backoff;
mod classify;
mod config;
pub mod constants;
mod context;
mod executor;
mod handle;
mod job;
mod operation;
mod policy;
mod queue;
pub mod telemetry;

pub use backoff::Backoff;
pub use classify::{Classify, FailureKind};
pub use config::{BackoffConfig, BackoffStrategy, ConfigError, RetryConfig};
pub use context::RetryContext;
pub use executor::RetryExecutor;
pub use handle::RetryHandle;
pub use policy::RetryPolicy;
#[cfg(any(feature = "test-util", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub use queue::ManualQueue;
pub use queue::{DelayQueue, Job, TimerQueue};
