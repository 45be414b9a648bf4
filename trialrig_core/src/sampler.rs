//! Fixed-cadence acquisition for one trial.
//!
//! `SamplingEngine::spawn` starts a thread that runs the countdown, then reads
//! the trial's channel on a monotonic grid of `interval` ticks until stopped.
//! Each reading is corrected with the offsets snapshot taken at start and
//! appended to the session log and the live trial buffer.
//!
//! Each engine owns exactly one thread, joined by `stop` or on drop.
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use trialrig_traits::ChannelId;

use crate::error::{Result, conflict};
use crate::hw_error::map_hw_error;
use crate::notify::{Notification, Notifier};
use crate::offsets::CalibrationOffsets;
use crate::sample::{Sample, SampleLog, TrialBuffer};
use crate::status::TrialPhase;
use crate::util::{MIN_INTERVAL, next_tick};
use crate::{SharedClock, SharedReader};

/// Longest single sleep during the countdown, bounding stop latency.
const COUNTDOWN_SLICE: Duration = Duration::from_millis(20);

/// What the sampler treats as fixed for the whole trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialContext {
    pub trial: u32,
    pub condition: String,
    pub channel: ChannelId,
    pub gain: u32,
}

/// Pause bookkeeping for one trial.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrialTiming {
    start: Option<Instant>,
    pause_started: Option<Instant>,
    paused_total: Duration,
}

impl TrialTiming {
    pub fn begin(&mut self, at: Instant) {
        *self = Self {
            start: Some(at),
            ..Self::default()
        };
    }

    pub fn start(&self) -> Option<Instant> {
        self.start
    }

    /// Returns false if already paused.
    pub fn pause(&mut self, at: Instant) -> bool {
        if self.pause_started.is_some() {
            return false;
        }
        self.pause_started = Some(at);
        true
    }

    /// Close the open pause, returning its length.
    pub fn resume(&mut self, at: Instant) -> Option<Duration> {
        let began = self.pause_started.take()?;
        let d = at.saturating_duration_since(began);
        self.paused_total += d;
        Some(d)
    }

    pub fn paused_total(&self) -> Duration {
        self.paused_total
    }

    /// Seconds since start with every pause (including an open one) removed.
    pub fn elapsed_at(&self, now: Instant) -> f64 {
        let Some(start) = self.start else {
            return 0.0;
        };
        let mut paused = self.paused_total;
        if let Some(p) = self.pause_started {
            paused += now.saturating_duration_since(p);
        }
        now.saturating_duration_since(start)
            .saturating_sub(paused)
            .as_secs_f64()
    }
}

struct RunShared {
    phase: AtomicU8,
    stop: AtomicBool,
    paused: AtomicBool,
    timing: Mutex<TrialTiming>,
}

impl RunShared {
    fn timing(&self) -> std::sync::MutexGuard<'_, TrialTiming> {
        self.timing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// How a sampling run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// False when stopped during the countdown.
    pub reached_recording: bool,
    pub samples: usize,
    /// Ticks whose read failed.
    pub skipped: usize,
    pub paused_total: Duration,
}

/// Everything a sampling thread needs.
pub struct SamplerSetup {
    pub ctx: TrialContext,
    pub reader: SharedReader,
    pub offsets: Arc<CalibrationOffsets>,
    pub log: SampleLog,
    pub buffer: TrialBuffer,
    pub clock: SharedClock,
    pub interval: Duration,
    pub countdown: Duration,
    pub notifier: Notifier,
}

pub struct SamplingEngine {
    ctx: TrialContext,
    shared: Arc<RunShared>,
    join_handle: Option<JoinHandle<RunReport>>,
}

impl SamplingEngine {
    pub fn spawn(setup: SamplerSetup) -> Self {
        let ctx = setup.ctx.clone();
        let shared = Arc::new(RunShared {
            phase: AtomicU8::new(TrialPhase::Countdown as u8),
            stop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            timing: Mutex::new(TrialTiming::default()),
        });
        let shared_clone = Arc::clone(&shared);
        tracing::info!(
            trial = ctx.trial,
            condition = %ctx.condition,
            channel = ctx.channel,
            countdown_s = setup.countdown.as_secs_f64(),
            "sampler started"
        );
        let join_handle = std::thread::spawn(move || run(setup, &shared_clone));
        Self {
            ctx,
            shared,
            join_handle: Some(join_handle),
        }
    }

    pub fn context(&self) -> &TrialContext {
        &self.ctx
    }

    pub fn phase(&self) -> TrialPhase {
        TrialPhase::from_u8(self.shared.phase.load(Ordering::Acquire))
    }

    /// Pause-adjusted seconds since recording began.
    pub fn elapsed(&self, now: Instant) -> f64 {
        self.shared.timing().elapsed_at(now)
    }

    pub fn pause(&self, at: Instant) -> Result<()> {
        self.shared
            .phase
            .compare_exchange(
                TrialPhase::Recording as u8,
                TrialPhase::Paused as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|cur| {
                conflict(format!(
                    "can only pause while recording (trial is {})",
                    TrialPhase::from_u8(cur)
                ))
            })?;
        self.shared.timing().pause(at);
        self.shared.paused.store(true, Ordering::Release);
        tracing::info!(trial = self.ctx.trial, "trial paused");
        Ok(())
    }

    /// Returns the length of the pause that just ended.
    pub fn resume(&self, at: Instant) -> Result<Duration> {
        self.shared
            .phase
            .compare_exchange(
                TrialPhase::Paused as u8,
                TrialPhase::Recording as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|cur| {
                conflict(format!(
                    "trial is not paused (trial is {})",
                    TrialPhase::from_u8(cur)
                ))
            })?;
        let (paused_for, total) = {
            let mut t = self.shared.timing();
            (t.resume(at).unwrap_or_default(), t.paused_total())
        };
        self.shared.paused.store(false, Ordering::Release);
        tracing::info!(
            trial = self.ctx.trial,
            paused_s = paused_for.as_secs_f64(),
            total_paused_s = total.as_secs_f64(),
            "trial resumed"
        );
        Ok(paused_for)
    }

    /// Stop sampling and wait for the thread. Observed within one interval.
    pub fn stop(mut self) -> RunReport {
        self.finish()
    }

    fn finish(&mut self) -> RunReport {
        self.shared.stop.store(true, Ordering::Release);
        let Some(handle) = self.join_handle.take() else {
            return RunReport::default();
        };
        match handle.join() {
            Ok(report) => {
                tracing::info!(
                    trial = self.ctx.trial,
                    samples = report.samples,
                    skipped = report.skipped,
                    "sampler stopped"
                );
                report
            }
            Err(e) => {
                tracing::error!(?e, trial = self.ctx.trial, "sampler thread panicked");
                RunReport {
                    reached_recording: self.shared.timing().start().is_some(),
                    ..RunReport::default()
                }
            }
        }
    }
}

impl Drop for SamplingEngine {
    fn drop(&mut self) {
        if self.join_handle.is_some() {
            let _ = self.finish();
        }
    }
}

fn stopping(shared: &RunShared) -> bool {
    shared.stop.load(Ordering::Acquire)
}

fn run(setup: SamplerSetup, shared: &RunShared) -> RunReport {
    let SamplerSetup {
        ctx,
        reader,
        offsets,
        log,
        buffer,
        clock,
        interval,
        countdown,
        notifier,
    } = setup;
    let interval = interval.max(MIN_INTERVAL);
    let mut report = RunReport::default();

    let deadline = clock.now() + countdown;
    loop {
        if stopping(shared) {
            tracing::debug!(trial = ctx.trial, "countdown cancelled");
            return report;
        }
        let now = clock.now();
        if now >= deadline {
            break;
        }
        clock.sleep((deadline - now).min(COUNTDOWN_SLICE));
    }

    let start = clock.now();
    shared.timing().begin(start);
    buffer.clear();
    shared
        .phase
        .store(TrialPhase::Recording as u8, Ordering::Release);
    report.reached_recording = true;
    notifier.send(Notification::Phase {
        phase: TrialPhase::Recording,
        trial: ctx.trial,
        condition: ctx.condition.clone(),
    });
    tracing::info!(trial = ctx.trial, "recording");

    let mut next = start + interval;
    loop {
        if stopping(shared) {
            break;
        }
        clock.sleep_until(next);
        if stopping(shared) {
            break;
        }
        let now = clock.now();
        next = next_tick(next, interval, now);
        if shared.paused.load(Ordering::Acquire) {
            continue;
        }

        let timestamp = shared.timing().elapsed_at(now);
        let read = reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read(ctx.channel);
        match read {
            Ok(raw) => {
                let sample = Sample {
                    trial: ctx.trial,
                    condition: ctx.condition.clone(),
                    channel: ctx.channel,
                    gain: ctx.gain,
                    timestamp,
                    raw,
                    corrected: offsets.correct(ctx.channel, raw),
                };
                log.append(sample.clone());
                buffer.push(sample);
                report.samples += 1;
            }
            Err(e) => {
                report.skipped += 1;
                let mapped = map_hw_error(&*e);
                tracing::debug!(
                    trial = ctx.trial,
                    channel = ctx.channel,
                    error = %mapped,
                    "read failed; tick skipped"
                );
            }
        }
    }
    report.paused_total = shared.timing().paused_total();
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_time_is_excluded_from_timestamps() {
        let t0 = Instant::now();
        let at = |ms| t0 + Duration::from_millis(ms);
        let mut t = TrialTiming::default();
        t.begin(t0);
        assert!(t.pause(at(1_000)));
        assert!(!t.pause(at(1_500)));
        // during the pause the clock is frozen at the pause point
        assert!((t.elapsed_at(at(2_000)) - 1.0).abs() < 1e-9);
        assert_eq!(t.resume(at(3_000)), Some(Duration::from_secs(2)));
        assert!((t.elapsed_at(at(5_000)) - 3.0).abs() < 1e-9);
        assert_eq!(t.resume(at(6_000)), None);
        assert_eq!(t.paused_total(), Duration::from_secs(2));
    }

    #[test]
    fn elapsed_before_begin_is_zero() {
        let t = TrialTiming::default();
        assert_eq!(t.elapsed_at(Instant::now()), 0.0);
    }
}
