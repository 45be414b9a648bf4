use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Wait until the provided `is_high` predicate becomes false (i.e., line goes low),
/// or a timeout expires. Sleeps in small intervals to avoid CPU spinning.
pub fn wait_until_low_with_timeout(
    mut is_high: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while is_high() {
        if Instant::now() >= deadline {
            return Err(HwError::DataReadyTimeout);
        }
        std::thread::sleep(poll_interval);
    }
    Ok(())
}

/// Full-scale magnitude of the 24-bit two's complement HX711 output.
pub const HX711_FULL_SCALE_COUNTS: f64 = 8_388_608.0;

/// Convert signed HX711 counts to a bridge voltage ratio (V/V).
///
/// The differential input range is +/-0.5 * AVDD / gain, so a full-scale reading
/// at gain 128 corresponds to a ratio of 1/256.
#[inline]
pub fn counts_to_voltage_ratio(counts: i32, gain: u32) -> f64 {
    f64::from(counts) / HX711_FULL_SCALE_COUNTS * 0.5 / f64::from(gain.max(1))
}

/// Number of trailing SCK pulses selecting gain/channel for the next conversion.
pub fn gain_pulses(gain: u32) -> Option<u8> {
    match gain {
        128 => Some(25),
        32 => Some(26),
        64 => Some(27),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_at_gain_128() {
        let r = counts_to_voltage_ratio(8_388_608, 128);
        assert!((r - 1.0 / 256.0).abs() < 1e-12);
        assert_eq!(counts_to_voltage_ratio(0, 128), 0.0);
        assert!(counts_to_voltage_ratio(-4_194_304, 64) < 0.0);
    }

    #[test]
    fn gain_pulse_table() {
        assert_eq!(gain_pulses(128), Some(25));
        assert_eq!(gain_pulses(32), Some(26));
        assert_eq!(gain_pulses(64), Some(27));
        assert_eq!(gain_pulses(16), None);
    }
}
