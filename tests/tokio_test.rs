#![cfg(feature = "tokio")]

use promise_chain::{all, delay, retry, Context, Error, Promise};
use rstest::rstest;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::runtime::Handle;

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delay_on_tokio_timer() {
    let ctx = Context::tokio(Handle::current());
    let start = Instant::now();
    delay::<Error>(&ctx, Duration::from_millis(20))
        .settled()
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_timeout_on_tokio() {
    let ctx = Context::tokio(Handle::current());
    let (_producer, stalled) = Promise::<i32>::pending();
    let err = stalled
        .add_timeout(&ctx, Duration::from_millis(10))
        .settled()
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_all_and_retry_on_tokio() {
    let ctx = Context::tokio(Handle::current());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let flaky = retry(&ctx, 2, Duration::from_millis(5), move || {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Promise::rejected(Error::msg("flaky"))
        } else {
            Promise::fulfilled(3)
        }
    });
    let mapped = delay::<Error>(&ctx, Duration::from_millis(5)).map(&ctx, |()| 1);
    let joined = all(vec![mapped, Promise::fulfilled(2), flaky]);
    assert_eq!(joined.settled().await.unwrap(), vec![1, 2, 3]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
