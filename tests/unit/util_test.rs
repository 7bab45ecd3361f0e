//! Tests for utility functions

use std::time::Duration;

use prometheus_relay::util::{init_tracing, now_ms, system_clock, Clock, ManualClock};

#[test]
fn test_manual_clock_advances() {
    let clock = ManualClock::new();
    let start = clock.now();
    clock.advance(Duration::from_millis(250));
    assert_eq!(clock.now() - start, Duration::from_millis(250));
}

#[test]
fn test_manual_clock_sleep_advances() {
    let clock = ManualClock::new();
    let start = clock.now();
    clock.sleep(Duration::from_secs(3));
    assert_eq!(clock.now() - start, Duration::from_secs(3));
}

#[test]
fn test_manual_clock_clones_share_time() {
    let clock = ManualClock::new();
    let other = clock.clone();
    other.advance(Duration::from_secs(1));
    assert_eq!(clock.now(), other.now());
}

#[test]
fn test_system_clock_is_monotonic() {
    let clock = system_clock();
    let a = clock.now();
    clock.sleep(Duration::ZERO);
    assert!(clock.now() >= a);
}

#[test]
fn test_now_ms() {
    assert!(now_ms() > 0);
}

#[test]
fn test_init_tracing_once() {
    let _ = init_tracing();
    assert!(!init_tracing());
}
