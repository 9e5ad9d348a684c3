use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use std::thread;
use std::time::Duration;

use feedcart_hardware::error::HwError;
use feedcart_hardware::util::{mean_counts, wait_until, wait_until_low_with_timeout};

#[test]
fn wait_until_low_success_path() {
    let high = Arc::new(AtomicBool::new(true));
    let high_bg = high.clone();
    // Flip low after a short delay
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(3));
        high_bg.store(false, Ordering::Relaxed);
    });

    let res = wait_until_low_with_timeout(
        || high.load(Ordering::Relaxed),
        Duration::from_millis(50),
        Duration::from_micros(200),
    );
    assert!(res.is_ok(), "expected success, got {res:?}");
}

#[test]
fn wait_until_low_timeout_path() {
    let high = Arc::new(AtomicBool::new(true));

    let err = wait_until_low_with_timeout(
        || high.load(Ordering::Relaxed),
        Duration::from_millis(5),
        Duration::from_micros(200),
    )
    .expect_err("expected timeout error");

    match err {
        HwError::DataReadyTimeout => {}
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn wait_until_times_out_with_generic_timeout() {
    let err = wait_until(|| false, Duration::from_millis(5), Duration::from_millis(1))
        .expect_err("expected timeout");
    assert!(matches!(err, HwError::Timeout));
}

#[test]
fn mean_counts_rounds_and_handles_empty() {
    assert_eq!(mean_counts(&[]), None);
    assert_eq!(mean_counts(&[1, 2]), Some(2));
    assert_eq!(mean_counts(&[-10, -20, -30]), Some(-20));
    assert_eq!(mean_counts(&[i32::MAX, i32::MAX]), Some(i32::MAX));
}
