//! Runtime configuration for one session.
//!
//! These are the structs the engine consumes. They are separate from the
//! TOML-deserialized config in `trialrig_config` and are built from it in
//! `conversions`.

use std::path::PathBuf;
use std::time::Duration;

use trialrig_traits::ChannelId;

use crate::error::{Result, RigError};
use crate::util::interval_from_hz;

/// Session parameters, fixed for the lifetime of a `TrialStateMachine`.
#[derive(Debug, Clone)]
pub struct SessionCfg {
    /// Acquisition rate. Must be finite and > 0.
    pub sampling_frequency_hz: f64,
    pub calibration_duration: Duration,
    /// Pre-roll between `start_trial` and the first recorded tick.
    pub countdown: Duration,
    pub num_channels: u32,
    /// Completed trials after which a condition is done.
    pub trials_per_condition: u32,
    /// Gain recorded when the channel source does not report one.
    pub gain: u32,
    /// Condition labels in configuration order. Label `i` is read from channel `i`.
    pub conditions: Vec<String>,
    pub output_directory: PathBuf,
    /// N per V/V, used for the derived force column.
    pub force_factor: f64,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            sampling_frequency_hz: trialrig_config::DEFAULT_SAMPLING_FREQUENCY_HZ,
            calibration_duration: Duration::from_secs(5),
            countdown: Duration::from_secs(2),
            num_channels: 3,
            trials_per_condition: 5,
            gain: trialrig_config::DEFAULT_BRIDGE_GAIN,
            conditions: vec!["A".into(), "B".into(), "C".into()],
            output_directory: PathBuf::from("."),
            force_factor: trialrig_config::DEFAULT_FORCE_FACTOR,
        }
    }
}

impl SessionCfg {
    /// Defaults with the given rate and conditions, validated.
    pub fn new(sampling_frequency_hz: f64, conditions: Vec<String>) -> Result<Self> {
        let num_channels = u32::try_from(conditions.len()).unwrap_or(u32::MAX).max(1);
        let cfg = Self {
            sampling_frequency_hz,
            conditions,
            num_channels,
            ..Self::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if interval_from_hz(self.sampling_frequency_hz).is_none() {
            return Err(eyre::Report::new(RigError::Config(format!(
                "sampling frequency must be > 0 Hz, got {}",
                self.sampling_frequency_hz
            ))));
        }
        if self.conditions.is_empty() {
            return Err(eyre::Report::new(RigError::Config(
                "at least one condition is required".into(),
            )));
        }
        if self.trials_per_condition == 0 {
            return Err(eyre::Report::new(RigError::Config(
                "trials per condition must be >= 1".into(),
            )));
        }
        Ok(())
    }

    /// 1 / frequency. Falls back to the default rate if the value was never validated.
    pub fn sampling_interval(&self) -> Duration {
        interval_from_hz(self.sampling_frequency_hz).unwrap_or_else(|| {
            Duration::from_secs_f64(1.0 / trialrig_config::DEFAULT_SAMPLING_FREQUENCY_HZ)
        })
    }

    /// Channel bound to `condition`: its position in the configured label list.
    pub fn channel_for(&self, condition: &str) -> Option<ChannelId> {
        self.conditions
            .iter()
            .position(|c| c == condition)
            .and_then(|i| ChannelId::try_from(i).ok())
    }
}
