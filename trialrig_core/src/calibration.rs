//! Offset calibration: average every channel over a fixed window.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use trialrig_traits::{ChannelId, ChannelReader};

use crate::SharedClock;
use crate::error::{Result, RigError};
use crate::hw_error::map_hw_error;
use crate::notify::{Notification, Notifier};
use crate::offsets::CalibrationOffsets;
use crate::util::MIN_INTERVAL;

/// Wait before the first reading so the bridge output settles.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Operator-controlled cancellation flag, shared by clone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Re-arm after a cancelled run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    pub offsets: CalibrationOffsets,
    /// Channels that produced no readings; their offset is 0.0.
    pub zero_sample_channels: Vec<ChannelId>,
    /// Successful readings per channel.
    pub counts: BTreeMap<ChannelId, usize>,
    pub failed_reads: usize,
}

pub struct CalibrationProcedure {
    duration: Duration,
    interval: Duration,
    settle: Duration,
    clock: SharedClock,
    notifier: Notifier,
}

impl CalibrationProcedure {
    pub fn new(duration: Duration, interval: Duration, clock: SharedClock) -> Self {
        Self {
            duration,
            interval,
            settle: SETTLE_DELAY,
            clock,
            notifier: Notifier::disabled(),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sleep until `deadline` in slices; false if cancelled meanwhile.
    fn wait(&self, deadline: Instant, cancel: &CancelToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = self.clock.now();
            if now >= deadline {
                return true;
            }
            self.clock.sleep((deadline - now).min(WAIT_SLICE));
        }
    }

    /// Read every channel each `interval` for `duration`, then average.
    ///
    /// At least one sweep is always taken. A cancelled run returns
    /// `RigError::Cancelled` and produces nothing; if every read failed the
    /// result is `RigError::Calibration`.
    pub fn run(
        &self,
        reader: &mut dyn ChannelReader,
        channels: &[ChannelId],
        cancel: &CancelToken,
    ) -> Result<CalibrationReport> {
        if channels.is_empty() {
            return Err(eyre::Report::new(RigError::Calibration(
                "no channels available".into(),
            )));
        }
        tracing::info!(
            channels = ?channels,
            duration_s = self.duration.as_secs_f64(),
            "calibration started"
        );

        let settle_until = self.clock.now() + self.settle;
        if !self.wait(settle_until, cancel) {
            tracing::info!("calibration cancelled");
            return Err(eyre::Report::new(RigError::Cancelled));
        }

        let mut values: BTreeMap<ChannelId, Vec<f64>> =
            channels.iter().map(|&ch| (ch, Vec::new())).collect();
        let mut failed = 0usize;
        let start = self.clock.now();
        let end = start + self.duration;
        let mut last_whole: Option<u64> = None;

        loop {
            for &ch in channels {
                match reader.read(ch) {
                    Ok(v) => values.entry(ch).or_default().push(v),
                    Err(e) => {
                        failed += 1;
                        tracing::debug!(channel = ch, error = %map_hw_error(&*e), "calibration read failed");
                    }
                }
            }
            if cancel.is_cancelled() {
                tracing::info!("calibration cancelled");
                return Err(eyre::Report::new(RigError::Cancelled));
            }

            let now = self.clock.now();
            let remaining = end.saturating_duration_since(now);
            let whole = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            if last_whole != Some(whole) {
                last_whole = Some(whole);
                self.notifier
                    .send(Notification::CalibrationProgress { remaining });
            }
            if now >= end {
                break;
            }
            let next = (now + self.interval.max(MIN_INTERVAL)).min(end);
            if !self.wait(next, cancel) {
                tracing::info!("calibration cancelled");
                return Err(eyre::Report::new(RigError::Cancelled));
            }
        }

        let total_ok: usize = values.values().map(Vec::len).sum();
        if total_ok == 0 {
            tracing::error!(failed, "calibration failed: every read failed");
            return Err(eyre::Report::new(RigError::Calibration(format!(
                "no channel returned a reading ({failed} reads failed)"
            ))));
        }

        let mut offsets = BTreeMap::new();
        let mut counts = BTreeMap::new();
        let mut zero = Vec::new();
        for (ch, vals) in values {
            counts.insert(ch, vals.len());
            if vals.is_empty() {
                tracing::warn!(channel = ch, "no calibration readings; offset set to 0.0");
                self.notifier.send(Notification::CalibrationWarning {
                    channel: ch,
                    message: "no readings collected; offset set to 0.0".into(),
                });
                zero.push(ch);
                offsets.insert(ch, 0.0);
            } else {
                #[allow(clippy::cast_precision_loss)]
                let mean = vals.iter().sum::<f64>() / vals.len() as f64;
                tracing::info!(channel = ch, offset = mean, readings = vals.len(), "channel calibrated");
                offsets.insert(ch, mean);
            }
        }

        Ok(CalibrationReport {
            offsets: CalibrationOffsets::new(offsets),
            zero_sample_channels: zero,
            counts,
            failed_reads: failed,
        })
    }
}
