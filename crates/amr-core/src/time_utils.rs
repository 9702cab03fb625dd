/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Milliseconds between `origin_ms` and `now_ms`, zero when the origin is in the future.
pub fn elapsed_ms_since(origin_ms: u64, now_ms: u64) -> u64 {
    now_ms.saturating_sub(origin_ms)
}
