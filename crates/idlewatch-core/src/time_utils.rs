pub const SECONDS_PER_DAY: u64 = 86_400;

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Seconds elapsed between `earlier` and `now`, clamped at zero for future instants.
pub fn elapsed_seconds(earlier_unix: u64, now_unix: u64) -> u64 {
    now_unix.saturating_sub(earlier_unix)
}

/// Whole days contained in `seconds`, rounded down.
pub fn whole_days(seconds: u64) -> u64 {
    seconds / SECONDS_PER_DAY
}

/// Converts a fractional day count into seconds, treating negative or
/// non-finite input as zero.
pub fn days_to_seconds(days: f64) -> f64 {
    if !days.is_finite() || days <= 0.0 {
        return 0.0;
    }
    days * SECONDS_PER_DAY as f64
}
