//! Maps `Box<dyn Error>` from trait boundaries to typed `WeightError`.
//!
//! `WeightSource` uses `Box<dyn Error + Send + Sync>` so drivers stay
//! independent of this crate; this module converts those to our typed error
//! enum. `HwError` is always recognised; `LinkError` behind the
//! `wireless-errors` feature.

use feedcart_hardware::HwError;

use crate::error::WeightError;

/// Map a trait-boundary error to a typed `WeightError`.
///
/// Attempts to downcast known driver error types first, then falls back
/// to string-based heuristics.
pub fn map_source_error(e: &(dyn std::error::Error + 'static)) -> WeightError {
    if let Some(hw) = e.downcast_ref::<HwError>() {
        return match hw {
            HwError::Timeout | HwError::DataReadyTimeout => WeightError::Timeout,
            HwError::NoResponsiveChannels => WeightError::NoSensor,
            HwError::InvalidReading(s) => WeightError::InvalidReading(s.clone()),
            other => WeightError::HardwareFault(other.to_string()),
        };
    }

    // Feature-gated: wireless link errors
    #[cfg(feature = "wireless-errors")]
    {
        use feedcart_wireless::LinkError;
        if let Some(link) = e.downcast_ref::<LinkError>() {
            return match link {
                LinkError::Timeout(_) => WeightError::Timeout,
                LinkError::Stale(ms) => WeightError::Stale(*ms),
                LinkError::Protocol(p) => WeightError::InvalidReading(p.to_string()),
                LinkError::NoCorners => WeightError::InvalidReading(link.to_string()),
                other => WeightError::LinkDown(other.to_string()),
            };
        }
    }

    // Fallback: string-based detection
    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        WeightError::Timeout
    } else if lower.contains("not connected") || lower.contains("connection") {
        WeightError::LinkDown(s)
    } else {
        WeightError::Source(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hw_timeouts_collapse_to_timeout() {
        assert_eq!(map_source_error(&HwError::DataReadyTimeout), WeightError::Timeout);
        assert_eq!(map_source_error(&HwError::Timeout), WeightError::Timeout);
    }

    #[test]
    fn unknown_errors_fall_back_on_message() {
        let e = std::io::Error::other("read timed out");
        assert_eq!(map_source_error(&e), WeightError::Timeout);
        let e = std::io::Error::other("bus glitch");
        assert_eq!(map_source_error(&e), WeightError::Source("bus glitch".into()));
    }
}
