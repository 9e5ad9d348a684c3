use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Poll `ready` until it returns true or `timeout` expires.
/// Sleeps `poll_interval` between polls to avoid CPU spinning.
pub fn wait_until(
    mut ready: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while !ready() {
        if Instant::now() >= deadline {
            return Err(HwError::Timeout);
        }
        std::thread::sleep(poll_interval);
    }
    Ok(())
}

/// Wait until the provided `is_high` predicate becomes false (i.e., line goes low),
/// or a timeout expires.
pub fn wait_until_low_with_timeout(
    mut is_high: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    wait_until(|| !is_high(), timeout, poll_interval).map_err(|_| HwError::DataReadyTimeout)
}

/// Rounded mean of raw counts; `None` for an empty slice.
pub fn mean_counts(samples: &[i32]) -> Option<i32> {
    if samples.is_empty() {
        return None;
    }
    let sum: i64 = samples.iter().map(|&v| i64::from(v)).sum();
    let mean = (sum as f64 / samples.len() as f64).round();
    Some(mean.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32)
}
