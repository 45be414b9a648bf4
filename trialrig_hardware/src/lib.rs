//! Channel sources for the trial engine.
//!
//! Two variants implement [`ChannelReader`]: a synthetic generator used when no
//! bridge is attached, and (feature `hardware`, Linux only) a bank of HX711
//! amplifiers, one per channel. The CLI picks one at startup.
pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod hx711;
pub mod util;

use error::HwError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trialrig_traits::{BoxError, ChannelId, ChannelReader};

/// Baselines of the three simulated load cells, in V/V.
pub const DEFAULT_SYNTHETIC_BASES: [f64; 3] = [0.5, 0.3, 0.7];
/// Baseline for channels beyond the configured list.
pub const FALLBACK_SYNTHETIC_BASE: f64 = 0.5;
/// Half-width of the uniform noise added to every synthetic reading.
pub const DEFAULT_SYNTHETIC_NOISE: f64 = 0.05;

/// Synthetic bridge: `base(channel) + uniform(-noise, +noise)`.
pub struct SyntheticBridge {
    channels: Vec<ChannelId>,
    bases: Vec<f64>,
    noise: f64,
    gain: u32,
    rng: StdRng,
}

impl SyntheticBridge {
    pub fn new(num_channels: u32, gain: u32) -> Self {
        Self {
            channels: (0..num_channels).collect(),
            bases: DEFAULT_SYNTHETIC_BASES.to_vec(),
            noise: DEFAULT_SYNTHETIC_NOISE,
            gain,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_bases(mut self, bases: Vec<f64>) -> Self {
        self.bases = bases;
        self
    }

    /// Negative or non-finite noise is treated as no noise.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = if noise.is_finite() { noise.abs() } else { 0.0 };
        self
    }

    /// Reproducible sequence, for tests and demos.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn base_for(&self, channel: ChannelId) -> f64 {
        self.bases
            .get(channel as usize)
            .copied()
            .unwrap_or(FALLBACK_SYNTHETIC_BASE)
    }
}

impl ChannelReader for SyntheticBridge {
    fn channels(&self) -> Vec<ChannelId> {
        self.channels.clone()
    }

    fn read(&mut self, channel: ChannelId) -> Result<f64, BoxError> {
        if !self.channels.contains(&channel) {
            return Err(Box::new(HwError::ChannelUnavailable(channel)));
        }
        let base = self.base_for(channel);
        let jitter = if self.noise > 0.0 {
            self.rng.random_range(-self.noise..=self.noise)
        } else {
            0.0
        };
        Ok(base + jitter)
    }

    fn gain(&self, _channel: ChannelId) -> Option<u32> {
        Some(self.gain)
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use bank::Hx711Bank;

#[cfg(all(feature = "hardware", target_os = "linux"))]
mod bank {
    use std::time::Duration;

    use trialrig_traits::{BoxError, ChannelId, ChannelReader};

    use crate::error::{HwError, Result};
    use crate::hx711::Hx711;
    use crate::util::counts_to_voltage_ratio;

    /// One HX711 per logical channel; channel id = position in the pin list.
    pub struct Hx711Bank {
        cells: Vec<(ChannelId, Hx711)>,
        timeout: Duration,
    }

    impl Hx711Bank {
        /// Open every `(dt, sck)` pair. A channel that fails to open is logged and
        /// left out; the caller decides what an empty bank means.
        pub fn open(pins: &[(u8, u8)], gain: u32, timeout: Duration) -> Result<Self> {
            let gpio = rppal::gpio::Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
            let mut cells = Vec::with_capacity(pins.len());
            for (idx, (dt, sck)) in pins.iter().enumerate() {
                let channel = idx as ChannelId;
                match Hx711::open(&gpio, *dt, *sck, gain) {
                    Ok(cell) => {
                        tracing::info!(channel, dt, sck, gain, "bridge channel attached");
                        cells.push((channel, cell));
                    }
                    Err(e) => {
                        tracing::warn!(channel, error = %e, "bridge channel not attached");
                    }
                }
            }
            Ok(Self { cells, timeout })
        }
    }

    impl ChannelReader for Hx711Bank {
        fn channels(&self) -> Vec<ChannelId> {
            self.cells.iter().map(|(ch, _)| *ch).collect()
        }

        fn read(&mut self, channel: ChannelId) -> std::result::Result<f64, BoxError> {
            let timeout = self.timeout;
            let (_, cell) = self
                .cells
                .iter_mut()
                .find(|(ch, _)| *ch == channel)
                .ok_or(HwError::ChannelUnavailable(channel))?;
            let counts = cell.read_with_timeout(timeout)?;
            Ok(counts_to_voltage_ratio(counts, cell.gain()))
        }

        fn gain(&self, channel: ChannelId) -> Option<u32> {
            self.cells
                .iter()
                .find(|(ch, _)| *ch == channel)
                .map(|(_, cell)| cell.gain())
        }
    }
}
