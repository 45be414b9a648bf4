//! Conversions bridging `trialrig_config` types to `trialrig_core` types.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::SessionCfg;
use crate::error::Report;
use crate::paths::expand_home;
use crate::retry::{Backoff, RetryPolicy};
use crate::util::secs_to_duration;

// ── SessionCfg ───────────────────────────────────────────────────────────────

impl TryFrom<&trialrig_config::Config> for SessionCfg {
    type Error = Report;

    /// Fails only if the config was not sanitized (e.g. frequency <= 0).
    fn try_from(c: &trialrig_config::Config) -> Result<Self, Self::Error> {
        let s = &c.session;
        let cfg = Self {
            sampling_frequency_hz: s.sampling_frequency_hz,
            calibration_duration: secs_to_duration(s.calibration_duration_s),
            countdown: secs_to_duration(s.countdown_duration_s),
            num_channels: s.num_channels,
            trials_per_condition: s.trials_per_condition,
            gain: s.bridge_gain,
            conditions: s.condition_labels.clone(),
            output_directory: if s.output_directory.is_empty() {
                PathBuf::from(".")
            } else {
                expand_home(&s.output_directory)
            },
            force_factor: s.force_factor_n_per_vv,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

// ── RetryPolicy ──────────────────────────────────────────────────────────────

impl From<trialrig_config::Backoff> for Backoff {
    fn from(b: trialrig_config::Backoff) -> Self {
        match b {
            trialrig_config::Backoff::Fixed => Self::Fixed,
            trialrig_config::Backoff::Exponential => Self::Exponential,
        }
    }
}

impl From<&trialrig_config::Persistence> for RetryPolicy {
    fn from(p: &trialrig_config::Persistence) -> Self {
        Self {
            max_attempts: p.max_attempts.max(1),
            delay: Duration::from_millis(p.retry_delay_ms),
            max_delay: Duration::from_millis(p.max_delay_ms.max(p.retry_delay_ms)),
            backoff: p.backoff.into(),
        }
    }
}
