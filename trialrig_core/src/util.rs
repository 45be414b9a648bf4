//! Common time and formatting helpers for trialrig_core.

use std::time::{Duration, Instant};

/// Shortest pacing interval the sampler will accept.
pub const MIN_INTERVAL: Duration = Duration::from_micros(1);

/// Sampling interval for a rate in Hz; `None` unless `hz` is finite and > 0.
/// The result is at least one microsecond.
#[inline]
pub fn interval_from_hz(hz: f64) -> Option<Duration> {
    if !(hz.is_finite() && hz > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / hz)
        .ok()
        .map(|d| d.max(MIN_INTERVAL))
}

/// Seconds as a `Duration`; negative or non-finite input becomes zero.
#[inline]
pub fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Next tick on the fixed grid `previous + k * interval` that is still ahead of `now`.
///
/// Missed slots are skipped rather than replayed, so a slow read never causes a
/// burst of catch-up reads and the grid never drifts.
pub fn next_tick(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let interval = interval.max(MIN_INTERVAL);
    let next = previous + interval;
    if next > now {
        return next;
    }
    let behind = now.duration_since(next).as_nanos();
    let skipped = behind / interval.as_nanos() + 1;
    let skipped = u32::try_from(skipped).unwrap_or(u32::MAX);
    next + interval.saturating_mul(skipped)
}

/// Round-trip float text for the trial log (`0.5`, `1841.0`, `5e-05`).
pub use trialrig_config::fmt_float;

/// Integral rates print without a fractional part (`100`, not `100.0`).
pub fn fmt_frequency(hz: f64) -> String {
    if hz.is_finite() && hz.fract() == 0.0 && hz.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        let whole = hz as i64;
        whole.to_string()
    } else {
        fmt_float(hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_tick_stays_on_grid() {
        let t0 = Instant::now();
        let iv = Duration::from_millis(10);
        assert_eq!(next_tick(t0, iv, t0), t0 + iv);
        // 35 ms late: slots at 10, 20, 30 are gone, next is 40
        assert_eq!(
            next_tick(t0, iv, t0 + Duration::from_millis(35)),
            t0 + Duration::from_millis(40)
        );
        // exactly on a slot boundary moves past it
        assert_eq!(
            next_tick(t0, iv, t0 + Duration::from_millis(10)),
            t0 + Duration::from_millis(20)
        );
    }

    #[test]
    fn float_formatting_matches_log_layout() {
        assert_eq!(fmt_float(1841.0), "1841.0");
        assert_eq!(fmt_float(0.5), "0.5");
        assert_eq!(fmt_frequency(100.0), "100");
        assert_eq!(fmt_frequency(12.5), "12.5");
    }
}
