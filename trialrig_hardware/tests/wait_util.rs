use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rstest::rstest;
use trialrig_hardware::error::HwError;
use trialrig_hardware::util::wait_until_low_with_timeout;

#[test]
fn returns_once_data_ready_goes_low() {
    let dout_high = Arc::new(AtomicBool::new(true));
    let line = Arc::clone(&dout_high);
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(3));
        line.store(false, Ordering::Relaxed);
    });

    let res = wait_until_low_with_timeout(
        || dout_high.load(Ordering::Relaxed),
        Duration::from_millis(500),
        Duration::from_micros(200),
    );
    assert!(res.is_ok(), "expected data ready, got {res:?}");
}

#[test]
fn already_low_does_not_sleep() {
    let polls = AtomicU32::new(0);
    let t0 = Instant::now();
    wait_until_low_with_timeout(
        || {
            polls.fetch_add(1, Ordering::Relaxed);
            false
        },
        Duration::from_millis(100),
        Duration::from_millis(50),
    )
    .unwrap();
    assert_eq!(polls.load(Ordering::Relaxed), 1);
    assert!(t0.elapsed() < Duration::from_millis(50));
}

#[rstest]
#[case(Duration::from_millis(5))]
#[case(Duration::ZERO)]
fn stuck_high_times_out(#[case] timeout: Duration) {
    let err = wait_until_low_with_timeout(|| true, timeout, Duration::from_micros(200))
        .expect_err("expected a data-ready timeout");
    assert!(matches!(err, HwError::DataReadyTimeout), "got {err:?}");
}
