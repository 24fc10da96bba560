use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Truncate a string to `max` characters, appending "…" if truncated.
/// Handles multi-byte (CJK) correctly via char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}…")
    }
}

/// Like `truncate_chars` but without the ellipsis, for stored text.
pub fn take_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

static LAST_MICROS: AtomicI64 = AtomicI64::new(0);

/// Current time with a per-process guarantee that no two calls return the
/// same microsecond.
pub fn unique_now() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let mut prev = LAST_MICROS.load(Ordering::Relaxed);
    loop {
        let next = if now > prev { now } else { prev + 1 };
        match LAST_MICROS.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return DateTime::from_timestamp_micros(next).unwrap_or_else(Utc::now),
            Err(actual) => prev = actual,
        }
    }
}

/// `<category>_<YYYYmmdd_HHMMSS_ffffff>`
pub fn memory_id(category: &str, at: DateTime<Utc>) -> String {
    format!("{category}_{}", at.format("%Y%m%d_%H%M%S_%6f"))
}
