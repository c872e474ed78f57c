use std::time::Duration;

use super::jittered;

#[test]
fn test_zero_percent_is_exact() {
    let base = Duration::from_secs(10);
    assert_eq!(jittered(base, 0.0), base);
    assert_eq!(jittered(base, -3.0), base);
    assert_eq!(jittered(base, f64::NAN), base);
}

#[test]
fn test_stays_within_bounds() {
    let base = Duration::from_millis(1000);
    for _ in 0..1000 {
        let d = jittered(base, 0.2);
        assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200), "{d:?}");
    }
}

#[test]
fn test_percent_is_clamped_to_one() {
    let base = Duration::from_millis(1000);
    for _ in 0..1000 {
        assert!(jittered(base, 5.0) <= Duration::from_millis(2000));
    }
}

#[test]
fn test_zero_base_stays_zero() {
    assert_eq!(jittered(Duration::ZERO, 0.5), Duration::ZERO);
}

#[test]
fn test_actually_varies() {
    let base = Duration::from_secs(60);
    let samples: std::collections::HashSet<Duration> = (0..50).map(|_| jittered(base, 0.5)).collect();
    assert!(samples.len() > 1);
}
