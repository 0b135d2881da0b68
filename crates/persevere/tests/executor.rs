// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the retry executor on a tokio timer, using only public API.

mod util;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use persevere::{Backoff, FailureKind, RetryExecutor};
use rstest::rstest;
use tokio::time::Instant;
use util::{Calls, LogCapture, SheetError};

fn executor() -> RetryExecutor {
    RetryExecutor::new_tokio().with_fixed_backoff(Duration::from_millis(100))
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(3)]
#[case(6)]
#[tokio::test(start_paused = true)]
async fn always_failing_runs_max_retries_plus_one(#[case] max_retries: u32) {
    let calls = Calls::default();
    let counter = calls.clone();

    let result = executor()
        .with_max_retries(max_retries)
        .get_with_retry(move || Err::<(), _>(SheetError::Unavailable(counter.record())))
        .await;

    assert_eq!(calls.count(), max_retries + 1);
    assert_eq!(result, Err(SheetError::Unavailable(max_retries)));
}

#[tokio::test(start_paused = true)]
async fn fail_once_then_succeed() {
    let calls = Calls::default();
    let counter = calls.clone();

    let result = executor()
        .get_with_retry_context(move |context| {
            counter.record();
            match context.last_cause() {
                None => Err(SheetError::Unavailable(0)),
                Some(_) => Ok("B7"),
            }
        })
        .await;

    assert_eq!(result, Ok("B7"));
    assert_eq!(calls.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn kind_outside_filter_fails_after_one_attempt() {
    let calls = Calls::default();
    let counter = calls.clone();

    let result = executor()
        .retry_on([FailureKind::Transient])
        .get_with_retry(move || {
            counter.record();
            Err::<(), _>(SheetError::BadRange)
        })
        .await;

    assert_eq!(result, Err(SheetError::BadRange));
    assert_eq!(calls.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn abort_after_real_failure_reports_real_failure() {
    let result = executor()
        .retry_infinitely()
        .get_with_retry_context(|context| match context.attempt_index() {
            0 => Err::<(), _>(SheetError::Quota(0)),
            1 => Err(SheetError::Unavailable(1)),
            _ => Err(SheetError::Closed),
        })
        .await;

    assert_eq!(result, Err(SheetError::Unavailable(1)));
}

#[tokio::test(start_paused = true)]
async fn abort_on_first_attempt_reports_abort() {
    let result = executor().get_with_retry(|| Err::<(), _>(SheetError::Closed)).await;

    assert_eq!(result, Err(SheetError::Closed));
}

async fn attempt_starts(executor: RetryExecutor) -> Vec<Duration> {
    let origin = Instant::now();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&starts);

    let result = executor
        .with_fixed_backoff(Duration::from_secs(1))
        .with_max_retries(2)
        .get_future_with_retry(move |context| {
            recorded.lock().unwrap().push(origin.elapsed());
            let attempt = context.attempt_index();
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Err::<(), _>(SheetError::Unavailable(attempt))
            }
        })
        .await;

    assert_eq!(result, Err(SheetError::Unavailable(2)));
    starts.lock().unwrap().clone()
}

fn assert_near(actual: &[Duration], expected_millis: [u64; 3]) {
    assert_eq!(actual.len(), expected_millis.len());
    for (actual, expected) in actual.iter().zip(expected_millis.map(Duration::from_millis)) {
        assert!(actual.abs_diff(expected) <= Duration::from_millis(5), "expected {expected:?}, got {actual:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn fixed_delay_spaces_end_to_start() {
    let starts = attempt_starts(RetryExecutor::new_tokio()).await;

    assert_near(&starts, [0, 1300, 2600]);
}

#[tokio::test(start_paused = true)]
async fn fixed_rate_spaces_start_to_start() {
    let starts = attempt_starts(RetryExecutor::new_tokio().with_fixed_rate()).await;

    assert_near(&starts, [0, 1000, 2000]);
}

#[tokio::test(start_paused = true)]
async fn slow_attempt_at_fixed_rate_retries_immediately() {
    let origin = Instant::now();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&starts);

    let result = RetryExecutor::new_tokio()
        .with_fixed_backoff(Duration::from_millis(200))
        .with_fixed_rate()
        .get_future_with_retry(move |context| {
            recorded.lock().unwrap().push(origin.elapsed());
            let attempt = context.attempt_index();
            async move {
                if attempt == 0 {
                    tokio::time::sleep(Duration::from_millis(900)).await;
                    Err(SheetError::Unavailable(0))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

    assert_eq!(result, Ok(1));
    let starts = starts.lock().unwrap();
    assert!(starts[1].abs_diff(Duration::from_millis(900)) <= Duration::from_millis(5), "{starts:?}");
}

#[tokio::test(start_paused = true)]
async fn discarded_handle_still_runs_action() {
    let calls = Calls::default();
    let counter = calls.clone();

    drop(RetryExecutor::new_tokio().do_with_retry(move |_| {
        counter.record();
        Ok::<_, SheetError>(())
    }));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(calls.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_handle_keeps_retrying() {
    let calls = Calls::default();
    let counter = calls.clone();

    let handle = RetryExecutor::new_tokio()
        .with_fixed_backoff(Duration::from_secs(1))
        .with_max_retries(4)
        .get_with_retry(move || Err::<(), _>(SheetError::Unavailable(counter.record())));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.count(), 1);

    drop(handle);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(calls.count(), 5);
}

#[tokio::test(start_paused = true)]
async fn cancel_releases_captured_client() {
    let client = Arc::new(Mutex::new("sheet client"));
    let captured = Arc::clone(&client);

    let handle = RetryExecutor::new_tokio()
        .with_fixed_backoff(Duration::from_secs(3600))
        .retry_infinitely()
        .get_with_retry(move || {
            let _client = captured.lock().unwrap();
            Err::<(), _>(SheetError::Unavailable(0))
        });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(Arc::strong_count(&client), 2);

    handle.cancel();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(Arc::strong_count(&client), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_pending_retries() {
    let calls = Calls::default();
    let counter = calls.clone();

    let handle = executor()
        .retry_infinitely()
        .do_with_retry(move |_| Err(SheetError::Unavailable(counter.record())));

    tokio::time::sleep(Duration::from_millis(250)).await;
    let seen = calls.count();
    assert!(seen >= 2, "expected retries before cancelling, saw {seen}");

    handle.cancel();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(calls.count(), seen);
}

#[tokio::test(start_paused = true)]
async fn failing_inner_future_is_retried() {
    let calls = Calls::default();
    let counter = calls.clone();

    let result = executor()
        .get_future_with_retry(move |_| {
            let call = counter.record();
            async move {
                tokio::task::yield_now().await;
                if call < 2 { Err(SheetError::Quota(call)) } else { Ok(call) }
            }
        })
        .await;

    assert_eq!(result, Ok(2));
    assert_eq!(calls.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn do_with_retry_reports_unit() {
    let result = executor()
        .do_with_retry(|context| if context.is_first_retry() { Err(SheetError::Unavailable(0)) } else { Ok(()) })
        .await;

    assert_eq!(result, Ok(()));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_waits_for_rate_limit_backoff() {
    let origin = Instant::now();

    let result = executor()
        .with_rate_limit_backoff(Backoff::fixed(Duration::from_secs(30)))
        .get_with_retry_context(move |context| match context.attempt_index() {
            0 => Err(SheetError::Quota(0)),
            1 => Err(SheetError::Unavailable(1)),
            _ => Ok(origin.elapsed()),
        })
        .await;

    let elapsed = result.unwrap();
    assert!(elapsed.abs_diff(Duration::from_millis(30_100)) <= Duration::from_millis(5), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn rate_limited_still_obeys_budget() {
    let calls = Calls::default();
    let counter = calls.clone();

    let result = executor()
        .with_max_retries(2)
        .get_with_retry(move || Err::<(), _>(SheetError::Quota(counter.record())))
        .await;

    assert_eq!(result, Err(SheetError::Quota(2)));
    assert_eq!(calls.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_share_one_queue() {
    let executor = executor().with_uniform_jitter(Duration::from_millis(50));

    let handles: Vec<_> = (0..20_u32)
        .map(|id| {
            executor.get_with_retry_context(move |context| {
                if context.attempt_index() < id % 3 {
                    Err(SheetError::Unavailable(id))
                } else {
                    Ok(id)
                }
            })
        })
        .collect();

    for (id, handle) in (0..20_u32).zip(handles) {
        assert_eq!(handle.await, Ok(id));
    }
}

#[tokio::test(start_paused = true)]
#[should_panic]
async fn panicking_operation_panics_handle() {
    let _ = executor()
        .get_with_retry(|| -> Result<(), SheetError> { panic!("client bug") })
        .await;
}

#[tokio::test(start_paused = true)]
async fn events_describe_retries() {
    let capture = LogCapture::default();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let result = executor()
        .with_max_retries(1)
        .get_with_retry_context(|context| Err::<(), _>(SheetError::Quota(context.attempt_index())))
        .await;

    assert_eq!(result, Err(SheetError::Quota(1)));
    capture.assert_contains("WARN");
    capture.assert_contains("retry.attempt.index=0");
    capture.assert_contains("retry.delay=100");
    capture.assert_contains("DEBUG");
    capture.assert_contains("retry.rate_limit_backoff=false");
    capture.assert_contains("INFO");
    capture.assert_contains("Quota(1)");
}
