use std::time::Duration;

use setl::concurrency::gate::Gate;
use setl::error::ErrorKind;
use setl_telemetry::tracing::init_test_tracing;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread")]
async fn open_releases_all_parked_waiters() {
    init_test_tracing();

    let gate = Gate::new(false);

    let waiters: Vec<_> = (0..8)
        .map(|_| tokio::spawn(gate.wait_open()))
        .collect();

    // Let every waiter park on the closed gate before opening it.
    sleep(Duration::from_millis(50)).await;
    assert!(waiters.iter().all(|waiter| !waiter.is_finished()));

    gate.open();

    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn reclosed_gate_blocks_new_waiters_again() {
    init_test_tracing();

    let gate = Gate::new(false);
    gate.open();
    gate.wait_open().await.unwrap();

    gate.close();

    let err = gate
        .wait_open_timeout(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WaitTimeout);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_does_not_disturb_parked_waiters() {
    init_test_tracing();

    let gate = Gate::new(false);
    let waiter = tokio::spawn(gate.wait_open());

    sleep(Duration::from_millis(20)).await;

    // Closing an already-closed gate wakes nobody; the waiter stays parked
    // until the later open.
    gate.close();
    assert!(!waiter.is_finished());

    gate.open();
    waiter.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_wait_succeeds_when_opened_in_time() {
    init_test_tracing();

    let gate = Gate::new(false);

    let opener = {
        let gate = gate.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            gate.open();
        })
    };

    gate.wait_open_timeout(Duration::from_secs(5))
        .await
        .unwrap();
    opener.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_transitions_produce_no_errors() {
    init_test_tracing();

    let gate = Gate::new(false);

    gate.open();
    gate.open();
    assert!(gate.is_open());
    gate.wait_open().await.unwrap();

    gate.close();
    gate.close();
    assert!(!gate.is_open());
}
