//! Fixed-interval bounded polling.

use std::thread;
use std::time::Duration;

/// Call `probe` up to `attempts` times, sleeping `interval` between calls,
/// until it yields `Some`. Returns `Ok(None)` once the budget is spent; a
/// probe error stops polling immediately.
pub fn poll_until<T, E, F>(attempts: u32, interval: Duration, mut probe: F) -> Result<Option<T>, E>
where
    F: FnMut() -> Result<Option<T>, E>,
{
    for attempt in 1..=attempts {
        if let Some(value) = probe()? {
            return Ok(Some(value));
        }
        if attempt < attempts && !interval.is_zero() {
            thread::sleep(interval);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_first_success() {
        let mut calls = 0;
        let result: Result<_, ()> = poll_until(10, Duration::ZERO, || {
            calls += 1;
            Ok((calls == 3).then_some(calls))
        });
        assert_eq!(result, Ok(Some(3)));
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausts_budget() {
        let mut calls = 0;
        let result: Result<Option<()>, ()> = poll_until(4, Duration::ZERO, || {
            calls += 1;
            Ok(None)
        });
        assert_eq!(result, Ok(None));
        assert_eq!(calls, 4);
    }

    #[test]
    fn probe_error_stops_polling() {
        let mut calls = 0;
        let result: Result<Option<()>, &str> = poll_until(4, Duration::ZERO, || {
            calls += 1;
            Err("boom")
        });
        assert_eq!(result, Err("boom"));
        assert_eq!(calls, 1);
    }
}
