//! Deadline-bounded polling.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub(crate) enum PollError<E> {
    /// The probe itself failed; polling stops immediately.
    Probe(E),
    /// Zero timeout and the condition did not hold at call time.
    Missing,
    /// The deadline passed.
    Timeout { waited: Duration },
}

/// Call `probe` until it yields a value or `timeout` elapses.
///
/// `None` waits forever. A zero timeout probes exactly once. Between probes
/// the loop sleeps for `interval`, clipped to the time remaining.
pub(crate) fn poll_until<T, E>(
    timeout: Option<Duration>,
    interval: Duration,
    mut probe: impl FnMut() -> Result<Option<T>, E>,
) -> Result<T, PollError<E>> {
    let start = Instant::now();
    loop {
        if let Some(value) = probe().map_err(PollError::Probe)? {
            return Ok(value);
        }
        let waited = start.elapsed();
        let sleep_for = match timeout {
            Some(limit) if limit.is_zero() => return Err(PollError::Missing),
            Some(limit) if waited >= limit => return Err(PollError::Timeout { waited }),
            Some(limit) => interval.min(limit - waited),
            None => interval,
        };
        std::thread::sleep(sleep_for);
    }
}
