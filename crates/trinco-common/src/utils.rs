//! Deadline and time helpers
//!
//! Timeouts cross the wire as milliseconds where any value at or below zero
//! means "wait without bound". These helpers keep that convention in one
//! place.

use std::time::{Duration, Instant};

/// Converts a wire timeout into an absolute deadline.
///
/// # Examples
///
/// ```
/// use trinco_common::deadline_after_ms;
///
/// assert!(deadline_after_ms(0).is_none());
/// assert!(deadline_after_ms(-5).is_none());
/// assert!(deadline_after_ms(100).is_some());
/// ```
pub fn deadline_after_ms(timeout_ms: i64) -> Option<Instant> {
    if timeout_ms <= 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
    }
}

/// Converts a caller-facing timeout into an absolute deadline.
///
/// `Duration::ZERO` means unbounded.
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    if timeout.is_zero() {
        None
    } else {
        Some(Instant::now() + timeout)
    }
}

/// Milliseconds left until `deadline`, as carried on the wire.
///
/// Unbounded maps to 0. A bounded deadline never reports less than 1ms here;
/// expiry itself is checked with [`expired`] before forwarding.
pub fn remaining_ms(deadline: Option<Instant>) -> i64 {
    match deadline {
        None => 0,
        Some(d) => {
            let left = d.saturating_duration_since(Instant::now());
            (left.as_millis() as i64).max(1)
        }
    }
}

/// Time left until `deadline`, `None` when unbounded.
pub fn remaining_duration(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

/// Whether `deadline` has passed.
pub fn expired(deadline: Option<Instant>) -> bool {
    matches!(deadline, Some(d) if Instant::now() >= d)
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
