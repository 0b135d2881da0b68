// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Appends rows to a pretend spreadsheet that enforces a per-second request quota.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use persevere::{Backoff, Classify, FailureKind, RetryExecutor};
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
enum SheetError {
    #[error("quota exceeded, {0} requests already served this window")]
    Quota(u32),
    #[error("backend unavailable")]
    Unavailable,
}

impl Classify for SheetError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Quota(_) => FailureKind::RateLimited,
            Self::Unavailable => FailureKind::Transient,
        }
    }
}

/// Serves at most `quota` requests per second and fails 10% of the rest.
#[derive(Debug)]
struct SheetClient {
    quota: u32,
    window: Mutex<(Instant, u32)>,
}

impl SheetClient {
    fn new(quota: u32) -> Self {
        Self {
            quota,
            window: Mutex::new((Instant::now(), 0)),
        }
    }

    fn append_row(&self, row: u32) -> Result<String, SheetError> {
        let mut window = self.window.lock().expect("quota window lock poisoned");
        if window.0.elapsed() >= Duration::from_secs(1) {
            *window = (Instant::now(), 0);
        }

        if window.1 >= self.quota {
            return Err(SheetError::Quota(window.1));
        }
        window.1 += 1;

        if fastrand::u8(0..10) == 0 {
            return Err(SheetError::Unavailable);
        }

        Ok(format!("A{row}"))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let client = Arc::new(SheetClient::new(5));
    let executor = RetryExecutor::new_tokio()
        .with_exponential_backoff(Duration::from_millis(100), 2.0)
        .with_proportional_jitter(0.2)
        .with_max_delay(Duration::from_secs(2))
        .with_rate_limit_backoff(Backoff::fixed(Duration::from_secs(1)).with_uniform_jitter(Duration::from_millis(200)))
        .with_max_retries(8);

    let started = Instant::now();
    let handles: Vec<_> = (1..=20)
        .map(|row| {
            let client = Arc::clone(&client);
            executor.get_with_retry(move || client.append_row(row))
        })
        .collect();

    for (row, handle) in (1..=20).zip(handles) {
        match handle.await {
            Ok(cell) => println!("row {row} written to {cell} after {:?}", started.elapsed()),
            Err(error) => println!("row {row} failed: {error}"),
        }
    }
}
