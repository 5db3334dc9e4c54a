use chronicle::efficient_clock::{capture_timing, get_timestamp, reconcile};
use chronicle::Timing;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[test]
fn test_timestamp_monotonicity() {
    let mut prev = get_timestamp();
    for _ in 0..1000 {
        let current = get_timestamp();
        assert!(current >= prev, "Timestamps should be monotonically increasing");
        prev = current;
    }
}

#[test]
fn test_timestamp_advances_with_time() {
    let first = get_timestamp();
    thread::sleep(Duration::from_millis(2));
    let second = get_timestamp();
    assert!(second - first >= 2_000_000, "Counter ticks are nanoseconds");
}

#[test]
fn test_capture_timing_matches_wall_clock() {
    let before = SystemTime::now();
    let timing = capture_timing();
    let after = SystemTime::now();

    assert_eq!((timing.numerator, timing.denominator), (1, 1));
    let reference = reconcile(&timing, timing.timestamp);
    assert!(reference >= before - Duration::from_millis(1));
    assert!(reference <= after + Duration::from_millis(1));
}

#[test]
fn test_reconcile_recent_counter() {
    let timing = capture_timing();
    thread::sleep(Duration::from_millis(5));
    let stamped = reconcile(&timing, get_timestamp());

    let elapsed = stamped
        .duration_since(reconcile(&timing, timing.timestamp))
        .unwrap();
    assert!(elapsed >= Duration::from_millis(5));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn test_reconcile_before_reference() {
    let timing = Timing {
        numerator: 1,
        denominator: 1,
        timestamp: 5_000_000_000,
        seconds: 1_000,
        nanoseconds: 0,
    };
    assert_eq!(reconcile(&timing, 2_000_000_000), UNIX_EPOCH + Duration::from_secs(997));
    assert_eq!(reconcile(&timing, 8_000_000_000), UNIX_EPOCH + Duration::from_secs(1_003));
}

#[test]
fn test_reconcile_handles_extreme_counters() {
    let timing = Timing {
        numerator: 1,
        denominator: 1,
        timestamp: u64::MAX,
        seconds: 1_700_000_000,
        nanoseconds: 0,
    };
    let early = reconcile(&timing, 0);
    assert!(early < UNIX_EPOCH + Duration::from_secs(1_700_000_000));
}
