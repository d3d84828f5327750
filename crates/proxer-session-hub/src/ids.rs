//! Request/session id generation: `req-<nanos>-<seq>` / `sess-<nanos>-<seq>`
//! (spec §4.1), unique within a process lifetime via a monotonic counter
//! combined with a wall-clock-nanosecond component.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn next(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{nanos}-{seq}")
}

pub fn next_session_id() -> String {
    next("sess")
}

pub fn next_request_id() -> String {
    next("req")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(next_request_id()));
        }
    }

    #[test]
    fn ids_carry_expected_prefix() {
        assert!(next_session_id().starts_with("sess-"));
        assert!(next_request_id().starts_with("req-"));
    }
}
