//! Monotonic timestamps and their conversion to wall-clock time.
//!
//! Records store a raw monotonic counter, which is cheap to read but
//! meaningless on its own. Each metadata snapshot carries a [`Timing`]
//! calibration pairing one counter reading with the wall clock, and the
//! decoder uses it to turn every stored counter into an absolute time.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;

use crate::metadata::Timing;

lazy_static! {
    /// Process-wide origin of the monotonic counter.
    static ref ANCHOR: Instant = Instant::now();
}

/// Counter ticks are nanoseconds, so the conversion ratio is 1/1.
const NUMERATOR: u32 = 1;
const DENOMINATOR: u32 = 1;

/// Returns the current monotonic counter: nanoseconds since the process anchor.
///
/// Never decreases within a process.
///
/// # Examples
///
/// ```
/// # use chronicle::efficient_clock::get_timestamp;
/// let first = get_timestamp();
/// let second = get_timestamp();
/// assert!(second >= first);
/// ```
#[inline]
pub fn get_timestamp() -> u64 {
    ANCHOR.elapsed().as_nanos() as u64
}

/// Captures a calibration reference: the counter and the wall clock, read back to back.
pub fn capture_timing() -> Timing {
    let timestamp = get_timestamp();
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Timing {
        numerator: NUMERATOR,
        denominator: DENOMINATOR,
        timestamp,
        seconds: wall.as_secs() as i64,
        nanoseconds: i64::from(wall.subsec_nanos()),
    }
}

/// Converts a raw counter value into wall-clock time using `timing`.
///
/// Counters read before the calibration point land before its wall-clock time.
/// The difference is always taken in the direction that keeps it
/// non-negative, then the sign is applied.
pub fn reconcile(timing: &Timing, counter: u64) -> SystemTime {
    let base = reference_time(timing);

    let (first, second, later) = if counter < timing.timestamp {
        (counter, timing.timestamp, false)
    } else {
        (timing.timestamp, counter, true)
    };

    let ticks = u128::from(second - first);
    let nanos = ticks * u128::from(timing.numerator) / u128::from(timing.denominator.max(1));
    let offset = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));

    let shifted = if later {
        base.checked_add(offset)
    } else {
        base.checked_sub(offset)
    };
    shifted.unwrap_or(base)
}

/// Wall-clock time of the calibration point.
fn reference_time(timing: &Timing) -> SystemTime {
    let nanos = Duration::from_nanos(timing.nanoseconds.clamp(0, 999_999_999) as u64);
    let whole = Duration::from_secs(timing.seconds.unsigned_abs());
    let seconds = if timing.seconds >= 0 {
        UNIX_EPOCH.checked_add(whole)
    } else {
        UNIX_EPOCH.checked_sub(whole)
    };
    seconds
        .and_then(|time| time.checked_add(nanos))
        .unwrap_or(UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(numerator: u32, denominator: u32) -> Timing {
        Timing {
            numerator,
            denominator,
            timestamp: 1_000,
            seconds: 100,
            nanoseconds: 500,
        }
    }

    #[test]
    fn test_reconcile_at_reference() {
        let t = timing(1, 1);
        assert_eq!(reconcile(&t, 1_000), UNIX_EPOCH + Duration::new(100, 500));
    }

    #[test]
    fn test_reconcile_after_and_before_reference() {
        let t = timing(1, 1);
        assert_eq!(reconcile(&t, 3_000), UNIX_EPOCH + Duration::new(100, 2_500));
        assert_eq!(reconcile(&t, 0), UNIX_EPOCH + Duration::new(99, 999_999_500));
    }

    #[test]
    fn test_reconcile_applies_ratio() {
        // 125/3 ns per tick
        let t = timing(125, 3);
        assert_eq!(reconcile(&t, 1_003), UNIX_EPOCH + Duration::new(100, 625));
    }
}
