//! Time utilities for ConsultEase
//!
//! Provides common time-related operations used across crates.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system time is before the Unix epoch, which only happens
/// on a device whose RTC was never set.
///
/// # Examples
/// ```
/// use ce_core::time::current_time_millis;
///
/// let now = current_time_millis();
/// assert!(now > 0);
/// ```
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Calculate elapsed time in milliseconds since a given timestamp.
///
/// Returns 0 if the given time is in the future.
pub fn elapsed_millis(since: u64) -> u64 {
    current_time_millis().saturating_sub(since)
}

/// Time left of `total` for something that started at `started_millis`.
///
/// Returns Duration::ZERO once the deadline has passed.
pub fn remaining(started_millis: u64, total: Duration) -> Duration {
    total.saturating_sub(Duration::from_millis(elapsed_millis(started_millis)))
}

/// Apply a signed millisecond offset to a Unix millisecond timestamp
pub fn apply_offset(millis: u64, offset_ms: i64) -> u64 {
    if offset_ms >= 0 {
        millis.saturating_add(offset_ms as u64)
    } else {
        millis.saturating_sub(offset_ms.unsigned_abs())
    }
}
