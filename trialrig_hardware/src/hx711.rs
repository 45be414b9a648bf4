use std::time::Duration;
use tracing::trace;

use crate::error::{HwError, Result};
use crate::util::{gain_pulses, wait_until_low_with_timeout};

/// Bit-banged HX711 load-cell amplifier on two GPIO lines.
pub struct Hx711 {
    dt: rppal::gpio::InputPin,
    sck: rppal::gpio::OutputPin,
    gain: u32,
    gain_pulses: u8, // 25, 26, 27 based on gain/channel
}

impl Hx711 {
    pub fn open(gpio: &rppal::gpio::Gpio, dt_pin: u8, sck_pin: u8, gain: u32) -> Result<Self> {
        let pulses = gain_pulses(gain).ok_or(HwError::UnsupportedGain(gain))?;
        let dt = gpio
            .get(dt_pin)
            .map_err(|e| HwError::Gpio(format!("open hx711 dt pin {dt_pin}: {e}")))?
            .into_input();
        let mut sck = gpio
            .get(sck_pin)
            .map_err(|e| HwError::Gpio(format!("open hx711 sck pin {sck_pin}: {e}")))?
            .into_output();
        sck.set_low(); // clock idle low
        Ok(Self {
            dt,
            sck,
            gain,
            gain_pulses: pulses,
        })
    }

    pub fn gain(&self) -> u32 {
        self.gain
    }

    pub fn read_with_timeout(&mut self, timeout: Duration) -> Result<i32> {
        // Wait for data ready (DT goes low)
        let dt = &self.dt;
        wait_until_low_with_timeout(|| dt.is_high(), timeout, Duration::from_micros(200))?;

        // Clock out 24 bits
        let mut value: i32 = 0;
        for _ in 0..24 {
            self.sck.set_high();
            spin_delay_100ns();
            value = (value << 1) | i32::from(self.dt.is_high());
            self.sck.set_low();
            spin_delay_100ns();
        }

        // Pulse gain to set next measurement
        for _ in 0..self.gain_pulses.saturating_sub(24) {
            self.sck.set_high();
            spin_delay_100ns();
            self.sck.set_low();
            spin_delay_100ns();
        }

        // Sign extend 24-bit
        if (value & 0x80_0000) != 0 {
            value |= !0xFF_FFFF;
        }
        trace!(raw = value, "hx711 raw read");
        Ok(value)
    }
}

#[inline(always)]
fn spin_delay_100ns() {
    std::hint::spin_loop();
}
