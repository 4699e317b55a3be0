//! Wall-clock helpers.
//!
//! Expiry deadlines are absolute unix milliseconds (EXAT/PXAT hand us unix
//! timestamps directly), so everything here is wall clock rather than
//! monotonic time.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time in milliseconds since the unix epoch.
#[inline]
pub fn mstime() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mstime_advances() {
        let a = mstime();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = mstime();
        assert!(b >= a + 5);
    }
}
