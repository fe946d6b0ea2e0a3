use chrono::{DateTime, Local, Utc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// How often and for how long to check a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Poll {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Block until `predicate` holds or `poll.timeout` elapses.
///
/// The predicate is checked at least once, so a zero timeout means "check now".
/// Returns whether the predicate was observed to hold.
pub fn wait_until(poll: Poll, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + poll.timeout;
    loop {
        if predicate() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(poll.interval.min(deadline - now));
    }
}

/// Run `op` up to `attempts` times, sleeping `delay` between failures.
///
/// Returns the first success or the last error. `attempts` of zero is treated as one.
pub fn retry<T, E: std::fmt::Display>(
    attempts: u32,
    delay: Duration,
    op: impl FnMut(u32) -> Result<T, E>,
) -> Result<T, E> {
    retry_if(attempts, delay, |_| true, op)
}

/// Like [`retry`], but an error for which `transient` is false is returned at once.
pub fn retry_if<T, E: std::fmt::Display>(
    attempts: u32,
    delay: Duration,
    transient: impl Fn(&E) -> bool,
    mut op: impl FnMut(u32) -> Result<T, E>,
) -> Result<T, E> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && transient(&e) => {
                debug!(attempt, attempts, "Attempt failed: {e}");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Local wall-clock rendering of epoch seconds, `YYYY-MM-DD HH:MM:SS`.
pub fn format_epoch_secs(secs: i64) -> String {
    match DateTime::from_timestamp(secs, 0) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "Unknown date".to_string(),
    }
}

/// UTC timestamp for epoch seconds, falling back to the epoch itself.
pub fn epoch_secs_to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const FAST: Poll = Poll::new(Duration::from_millis(1), Duration::from_millis(50));

    #[test]
    fn wait_until_sees_eventual_success() {
        let calls = Cell::new(0);
        let ok = wait_until(FAST, || {
            calls.set(calls.get() + 1);
            calls.get() >= 3
        });
        assert!(ok);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn wait_until_times_out() {
        assert!(!wait_until(FAST, || false));
    }

    #[test]
    fn zero_timeout_checks_once() {
        let calls = Cell::new(0);
        let ok = wait_until(Poll::new(Duration::ZERO, Duration::ZERO), || {
            calls.set(calls.get() + 1);
            false
        });
        assert!(!ok);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retry_returns_first_success() {
        let result: Result<u32, String> = retry(5, Duration::ZERO, |attempt| {
            if attempt < 3 {
                Err(format!("attempt {attempt}"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn retry_gives_up_with_last_error() {
        let calls = Cell::new(0);
        let result: Result<(), String> = retry(2, Duration::ZERO, |attempt| {
            calls.set(calls.get() + 1);
            Err(format!("attempt {attempt}"))
        });
        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn permanent_error_stops_retrying() {
        let calls = Cell::new(0);
        let result: Result<(), String> = retry_if(
            5,
            Duration::from_secs(60),
            |e: &String| e != "fatal",
            |_| {
                calls.set(calls.get() + 1);
                Err("fatal".to_string())
            },
        );
        assert_eq!(result, Err("fatal".to_string()));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn epoch_rendering() {
        assert_eq!(epoch_secs_to_utc(0), DateTime::UNIX_EPOCH);
        assert_eq!(format_epoch_secs(i64::MAX), "Unknown date");
        assert_eq!(format_epoch_secs(1_700_000_000).len(), 19);
    }
}
