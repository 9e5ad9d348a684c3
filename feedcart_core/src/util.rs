//! Small numeric and time helpers for the manager.
use std::time::{SystemTime, UNIX_EPOCH};

/// Clamp a reading to a valid weight. Non-finite values are rejected.
#[inline]
pub fn non_negative(kg: f64) -> Option<f64> {
    kg.is_finite().then(|| kg.max(0.0))
}

/// Milliseconds since the Unix epoch, `None` for pre-epoch times.
pub fn unix_ms(t: SystemTime) -> Option<u64> {
    t.duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Pad with zeros or truncate to exactly `N` entries; non-finite entries become 0.
pub fn fixed_cells<const N: usize>(values: &[f64]) -> [f64; N] {
    let mut out = [0.0; N];
    for (slot, v) in out.iter_mut().zip(values) {
        *slot = if v.is_finite() { *v } else { 0.0 };
    }
    out
}
