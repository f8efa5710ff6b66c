//! Retry bound and backoff growth through the public executor API.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use shipyard_core::cancel::CancelToken;
use shipyard_core::retry::{
    AttemptError, AttemptOutcome, Operation, RetryExecutor, RetryPolicy, retry,
};

use support::{CountingChannel, Reply, serve};

fn fast(max: u32) -> RetryPolicy {
    RetryPolicy::new(max, Duration::from_millis(1), Duration::from_secs(5))
}

#[tokio::test]
async fn failing_shell_command_runs_exactly_max_attempts() {
    let dir = tempfile::TempDir::new().unwrap();
    let counter = dir.path().join("count");
    let command = format!("echo x >> '{}'; exit 3", counter.display());
    let executor = RetryExecutor::new(Arc::new(CountingChannel::default()), CancelToken::new()).unwrap();

    let err = executor
        .execute(&Operation::shell("always fails", command, fast(3)))
        .await
        .unwrap_err();

    assert_eq!(err.attempt_count(), 3);
    assert_eq!(std::fs::read_to_string(&counter).unwrap().lines().count(), 3);
    assert!(err.last_error.to_string().contains("exited with 3"));
    assert!(err.attempts.iter().all(|a| a.outcome == AttemptOutcome::Failed));
    assert!(err.attempts.last().unwrap().delay_before_next_ms.is_none());
}

#[tokio::test]
async fn slow_attempt_times_out_and_consumes_a_retry() {
    let executor = RetryExecutor::new(Arc::new(CountingChannel::default()), CancelToken::new()).unwrap();
    let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(200));

    let err = executor
        .execute(&Operation::shell("sleepy", "sleep 5", policy))
        .await
        .unwrap_err();

    assert_eq!(err.attempt_count(), 2);
    assert!(matches!(err.last_error, AttemptError::TimedOut(_)));
    assert!(err.attempts.iter().all(|a| a.outcome == AttemptOutcome::TimedOut));
}

#[tokio::test(start_paused = true)]
async fn backoff_is_at_least_exponential_in_the_attempt_number() {
    let base = Duration::from_millis(100);
    let policy = RetryPolicy::new(5, base, Duration::from_secs(5)).with_jitter(Duration::from_millis(30));

    let err = retry("flaky", &policy, &CancelToken::new(), |_| async {
        Err::<(), _>(AttemptError::Failed("connection reset".into()))
    })
    .await
    .unwrap_err();

    let delays: Vec<u64> = err
        .attempts
        .iter()
        .filter_map(|a| a.delay_before_next_ms)
        .collect();
    assert_eq!(delays.len(), 4);
    for (k, delay) in delays.iter().enumerate() {
        let floor = 100u64 << k;
        assert!(*delay >= floor, "delay {delay}ms before attempt {} below {floor}ms", k + 2);
        assert!(*delay <= floor + 30, "jitter exceeded its bound");
    }
}

#[tokio::test(start_paused = true)]
async fn recovers_when_a_later_attempt_succeeds() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let done = retry("eventually", &fast(4), &CancelToken::new(), move |attempt| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if attempt < 3 {
                Err(AttemptError::Failed("not yet".into()))
            } else {
                Ok(attempt)
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(done.value, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(done.attempts.last().unwrap().outcome, AttemptOutcome::Succeeded);
}

#[tokio::test]
async fn cancellation_stops_the_backoff_sleep() {
    let cancel = CancelToken::new();
    let policy = RetryPolicy::new(3, Duration::from_secs(60), Duration::from_secs(5));
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = retry("waiting", &policy, &cancel, |_| async {
        Err::<(), _>(AttemptError::Failed("down".into()))
    })
    .await
    .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.attempt_count(), 1);
}

#[tokio::test]
async fn http_operation_retries_until_the_expected_status() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);
    let addr = serve(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Reply::status(503)
        } else {
            Reply::ok("{}")
        }
    })
    .await;
    let executor = RetryExecutor::new(Arc::new(CountingChannel::default()), CancelToken::new()).unwrap();

    let done = executor
        .execute(&Operation::http_get("health", format!("http://{addr}/health"), 200, fast(3)))
        .await
        .unwrap();

    assert_eq!(done.value.status, 200);
    assert_eq!(done.attempts.len(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
