//! Trial state machine: one instance per participant session.
//!
//! Owns the experiment counters and is the only writer of them. Sampling and
//! persistence run on their own threads; this type starts and stops them and
//! reports back through `Notifier`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use trialrig_traits::{ChannelReader, MonotonicClock, Storage};

use crate::calibration::{CalibrationProcedure, CalibrationReport, CancelToken};
use crate::config::SessionCfg;
use crate::error::{Result, RigError, conflict};
use crate::notify::{Notification, Notifier};
use crate::offsets::{CalibrationOffsets, OffsetStore};
use crate::paths::{SessionPaths, export_stamp};
use crate::persistence::{ExportReport, PersistenceWorker, TrialLogWriter, WorkerReport};
use crate::record::LogHeader;
use crate::retry::{RetryPolicy, write_with_retry};
use crate::sample::{SampleLog, TrialBuffer};
use crate::sampler::{SamplerSetup, SamplingEngine, TrialContext};
use crate::scheduler::order_for;
use crate::status::{SessionSummary, StatusReport, StopOutcome, Toggled, TrialPhase};
use crate::storage::FsStorage;
use crate::{SharedClock, SharedReader};

/// Counters and ordering for the whole experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentState {
    order: Vec<String>,
    condition_index: usize,
    current_condition: String,
    trial_index: u32,
    completed: BTreeMap<String, u32>,
    complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Advance {
    Next { condition_changed: bool },
    Complete,
}

impl ExperimentState {
    pub fn new(order: Vec<String>) -> Self {
        let current_condition = order.first().cloned().unwrap_or_default();
        Self {
            order,
            condition_index: 0,
            current_condition,
            trial_index: 1,
            completed: BTreeMap::new(),
            complete: false,
        }
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Position in `order`; equals `order.len()` after the last condition finished.
    pub fn condition_index(&self) -> usize {
        self.condition_index
    }

    pub fn current_condition(&self) -> &str {
        &self.current_condition
    }

    /// Global 1-based index of the next (or running) trial.
    pub fn trial_index(&self) -> u32 {
        self.trial_index
    }

    pub fn completed(&self, condition: &str) -> u32 {
        self.completed.get(condition).copied().unwrap_or(0)
    }

    pub fn total_completed(&self) -> u32 {
        self.completed.values().sum()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Count the trial just stopped and decide what comes next.
    pub(crate) fn complete_trial(&mut self, target: u32) -> Advance {
        let count = self
            .completed
            .entry(self.current_condition.clone())
            .or_default();
        *count += 1;
        let mut condition_changed = false;
        if *count >= target {
            self.condition_index += 1;
            match self.order.get(self.condition_index) {
                Some(next) => {
                    self.current_condition = next.clone();
                    condition_changed = true;
                }
                None => {
                    self.complete = true;
                    return Advance::Complete;
                }
            }
        }
        self.trial_index += 1;
        Advance::Next { condition_changed }
    }

    fn select(&mut self, index: usize) {
        if let Some(label) = self.order.get(index) {
            self.condition_index = index;
            self.current_condition = label.clone();
        }
    }

    fn resume_after_complete(&mut self) {
        self.complete = false;
        self.trial_index += 1;
    }
}

/// What a clean shutdown left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub summary: SessionSummary,
    pub worker: WorkerReport,
    pub had_data: bool,
}

pub struct SessionBuilder {
    cfg: SessionCfg,
    participant: String,
    reader: Option<SharedReader>,
    storage: Option<Arc<dyn Storage>>,
    clock: Option<SharedClock>,
    notifier: Notifier,
    offsets: CalibrationOffsets,
    retry: RetryPolicy,
    paths: Option<SessionPaths>,
}

impl SessionBuilder {
    pub fn new(cfg: SessionCfg, participant: impl Into<String>) -> Self {
        Self {
            cfg,
            participant: participant.into(),
            reader: None,
            storage: None,
            clock: None,
            notifier: Notifier::disabled(),
            offsets: CalibrationOffsets::default(),
            retry: RetryPolicy::default(),
            paths: None,
        }
    }

    pub fn reader<R: ChannelReader + Send + 'static>(mut self, reader: R) -> Self {
        self.reader = Some(Arc::new(Mutex::new(reader)));
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn offsets(mut self, offsets: CalibrationOffsets) -> Self {
        self.offsets = offsets;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Defaults to `cfg.output_directory` as given, unprobed.
    pub fn paths(mut self, paths: SessionPaths) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn build(self) -> Result<TrialStateMachine> {
        self.cfg.validate()?;
        if self.participant.trim().is_empty() {
            return Err(eyre::Report::new(RigError::Config(
                "participant id is required".into(),
            )));
        }
        let reader = self.reader.ok_or_else(|| {
            eyre::Report::new(RigError::Config("no channel source configured".into()))
        })?;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(FsStorage::new()));
        let clock: SharedClock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let paths = self
            .paths
            .unwrap_or_else(|| SessionPaths::new(&self.cfg.output_directory, &self.participant));

        let available = reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .channels();
        for (channel, label) in self.cfg.conditions.iter().enumerate() {
            let attached = u32::try_from(channel).is_ok_and(|ch| available.contains(&ch));
            if !attached {
                tracing::warn!(channel, condition = %label, "channel for condition is not available");
            }
        }

        let order = order_for(&self.participant, &self.cfg.conditions);
        tracing::info!(participant = %self.participant, order = %order.join(", "), "counterbalanced order");

        let log = SampleLog::new();
        let header = LogHeader {
            participant: self.participant.clone(),
            order: order.clone(),
            gain: self.cfg.gain,
            sampling_frequency_hz: self.cfg.sampling_frequency_hz,
            force_factor: self.cfg.force_factor,
        };
        let writer = Arc::new(TrialLogWriter::new(
            Arc::clone(&storage),
            Arc::clone(&clock),
            self.retry,
            paths.primary(),
            header,
            log.clone(),
        ));
        let worker = PersistenceWorker::spawn(Arc::clone(&writer), self.notifier.clone());

        Ok(TrialStateMachine {
            active: None,
            worker,
            state: ExperimentState::new(order),
            phase: TrialPhase::Idle,
            cfg: self.cfg,
            participant: self.participant,
            reader,
            offsets: OffsetStore::new(self.offsets),
            log,
            buffer: TrialBuffer::new(),
            writer,
            storage,
            retry: self.retry,
            paths,
            clock,
            notifier: self.notifier,
        })
    }
}

pub struct TrialStateMachine {
    // field order matters on drop: the sampler stops before the worker drains
    active: Option<SamplingEngine>,
    worker: PersistenceWorker,
    state: ExperimentState,
    /// Phase while no trial is active.
    phase: TrialPhase,
    cfg: SessionCfg,
    participant: String,
    reader: SharedReader,
    offsets: OffsetStore,
    log: SampleLog,
    buffer: TrialBuffer,
    writer: Arc<TrialLogWriter>,
    storage: Arc<dyn Storage>,
    retry: RetryPolicy,
    paths: SessionPaths,
    clock: SharedClock,
    notifier: Notifier,
}

impl TrialStateMachine {
    pub fn builder(cfg: SessionCfg, participant: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(cfg, participant)
    }

    pub fn phase(&self) -> TrialPhase {
        self.active.as_ref().map_or(self.phase, SamplingEngine::phase)
    }

    pub fn state(&self) -> &ExperimentState {
        &self.state
    }

    pub fn cfg(&self) -> &SessionCfg {
        &self.cfg
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    pub fn log(&self) -> &SampleLog {
        &self.log
    }

    pub fn buffer(&self) -> &TrialBuffer {
        &self.buffer
    }

    pub fn offsets(&self) -> Arc<CalibrationOffsets> {
        self.offsets.snapshot()
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn writer(&self) -> &TrialLogWriter {
        &self.writer
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Pause-adjusted seconds into the running trial.
    pub fn trial_elapsed(&self) -> Option<f64> {
        self.active
            .as_ref()
            .map(|e| e.elapsed(self.clock.now()))
    }

    fn require_idle(&self, what: &str) -> Result<()> {
        match self.phase() {
            TrialPhase::Idle => Ok(()),
            p if p.is_active() => Err(conflict(format!(
                "stop the current trial before {what} (trial is {p})"
            ))),
            TrialPhase::ExperimentComplete => Err(conflict(format!(
                "all conditions are complete; continue or end the experiment before {what}"
            ))),
            _ => Err(conflict("the session has ended")),
        }
    }

    pub fn select_condition(&mut self, label: &str) -> Result<()> {
        self.require_idle("changing condition")?;
        let Some(index) = self.state.order.iter().position(|c| c == label) else {
            return Err(conflict(format!(
                "unknown condition {label:?}; expected one of {}",
                self.state.order.join(", ")
            )));
        };
        self.state.select(index);
        let completed = self.state.completed(label);
        tracing::info!(
            condition = label,
            completed,
            target = self.cfg.trials_per_condition,
            "condition selected"
        );
        self.notifier.send(Notification::ConditionChanged {
            condition: label.to_string(),
            completed,
            target: self.cfg.trials_per_condition,
        });
        Ok(())
    }

    /// Begin the countdown for the next trial. Returns its index.
    pub fn start_trial(&mut self) -> Result<u32> {
        self.require_idle("starting another")?;
        let condition = self.state.current_condition.clone();
        let channel = self.cfg.channel_for(&condition).ok_or_else(|| {
            eyre::Report::new(RigError::Fatal(format!(
                "condition {condition:?} is not bound to a channel"
            )))
        })?;
        let gain = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gain(channel)
            .unwrap_or(self.cfg.gain);
        let trial = self.state.trial_index;
        let ctx = TrialContext {
            trial,
            condition: condition.clone(),
            channel,
            gain,
        };
        self.buffer.clear();
        let engine = SamplingEngine::spawn(SamplerSetup {
            ctx,
            reader: Arc::clone(&self.reader),
            offsets: self.offsets.snapshot(),
            log: self.log.clone(),
            buffer: self.buffer.clone(),
            clock: Arc::clone(&self.clock),
            interval: self.cfg.sampling_interval(),
            countdown: self.cfg.countdown,
            notifier: self.notifier.clone(),
        });
        self.active = Some(engine);
        self.notifier.send(Notification::Phase {
            phase: TrialPhase::Countdown,
            trial,
            condition,
        });
        Ok(trial)
    }

    fn active_engine(&self) -> Result<&SamplingEngine> {
        self.active
            .as_ref()
            .ok_or_else(|| conflict("no trial is running"))
    }

    pub fn pause(&mut self) -> Result<()> {
        let engine = self.active_engine()?;
        engine.pause(self.clock.now())?;
        let ctx = engine.context();
        self.notifier.send(Notification::Phase {
            phase: TrialPhase::Paused,
            trial: ctx.trial,
            condition: ctx.condition.clone(),
        });
        Ok(())
    }

    /// Returns how long the trial was paused.
    pub fn resume(&mut self) -> Result<Duration> {
        let engine = self.active_engine()?;
        let paused_for = engine.resume(self.clock.now())?;
        let ctx = engine.context();
        self.notifier.send(Notification::Phase {
            phase: TrialPhase::Recording,
            trial: ctx.trial,
            condition: ctx.condition.clone(),
        });
        Ok(paused_for)
    }

    /// Pause when recording, resume when paused.
    pub fn toggle_pause(&mut self) -> Result<Toggled> {
        if self.phase() == TrialPhase::Paused {
            self.resume().map(Toggled::Resumed)
        } else {
            self.pause()?;
            Ok(Toggled::Paused)
        }
    }

    /// Stop the running trial, count it, queue it for saving and move on.
    pub fn stop_trial(&mut self) -> Result<StopOutcome> {
        let engine = self
            .active
            .take()
            .ok_or_else(|| conflict("no trial is running"))?;
        let trial = engine.context().trial;
        let report = engine.stop();

        if !report.reached_recording {
            tracing::info!(trial, "trial aborted during countdown; not counted");
            self.phase = TrialPhase::Idle;
            self.notifier.send(Notification::Phase {
                phase: TrialPhase::Idle,
                trial,
                condition: self.state.current_condition.clone(),
            });
            return Ok(StopOutcome::Aborted { trial });
        }

        if let Err(e) = self.worker.enqueue(trial) {
            tracing::error!(trial, error = %e, "could not queue trial for saving");
            self.notifier.send(Notification::SaveFailed {
                trial,
                reason: e.to_string(),
            });
        }

        let stopped_condition = self.state.current_condition.clone();
        let target = self.cfg.trials_per_condition;
        let advance = self.state.complete_trial(target);
        tracing::info!(
            trial,
            condition = %stopped_condition,
            completed = self.state.completed(&stopped_condition),
            target,
            samples = report.samples,
            skipped = report.skipped,
            "trial stopped"
        );

        match advance {
            Advance::Complete => {
                self.phase = TrialPhase::ExperimentComplete;
                let summary = self.summary();
                tracing::info!(
                    total_trials = summary.total_trials,
                    samples = summary.samples,
                    "experiment complete"
                );
                self.notifier
                    .send(Notification::ExperimentComplete(summary.clone()));
                Ok(StopOutcome::ExperimentComplete(summary))
            }
            Advance::Next { condition_changed } => {
                self.phase = TrialPhase::Idle;
                self.buffer.clear();
                let condition = self.state.current_condition.clone();
                if condition_changed {
                    tracing::info!(
                        finished = %stopped_condition,
                        next = %condition,
                        "condition complete; switching"
                    );
                    self.notifier.send(Notification::ConditionChanged {
                        condition: condition.clone(),
                        completed: self.state.completed(&condition),
                        target,
                    });
                }
                self.notifier.send(Notification::Phase {
                    phase: TrialPhase::Idle,
                    trial: self.state.trial_index,
                    condition: condition.clone(),
                });
                Ok(StopOutcome::NextTrial {
                    trial: self.state.trial_index,
                    condition,
                    condition_changed,
                })
            }
        }
    }

    /// Accept more trials after completion. Counters and data are kept.
    pub fn continue_experiment(&mut self) -> Result<u32> {
        if self.phase() != TrialPhase::ExperimentComplete {
            return Err(conflict("the experiment is not complete"));
        }
        self.state.resume_after_complete();
        self.phase = TrialPhase::Idle;
        tracing::info!(trial = self.state.trial_index, "continuing with additional trials");
        Ok(self.state.trial_index)
    }

    /// Stop any running trial (it counts) and close the session to further trials.
    pub fn end_experiment(&mut self) -> Result<SessionSummary> {
        if self.phase() == TrialPhase::Ended {
            return Err(conflict("the session has already ended"));
        }
        if self.active.is_some() {
            self.stop_trial()?;
        }
        self.phase = TrialPhase::Ended;
        let summary = self.summary();
        tracing::info!(total_trials = summary.total_trials, "experiment ended");
        Ok(summary)
    }

    /// Run a fresh calibration and install it. A cancelled or failed run leaves
    /// the active offsets untouched.
    pub fn recalibrate(&mut self, cancel: &CancelToken) -> Result<CalibrationReport> {
        self.require_idle("recalibrating")?;
        let procedure = CalibrationProcedure::new(
            self.cfg.calibration_duration,
            self.cfg.sampling_interval(),
            Arc::clone(&self.clock),
        )
        .with_notifier(self.notifier.clone());
        let report = {
            let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
            let channels = reader.channels();
            procedure.run(&mut *reader, &channels, cancel)?
        };
        self.offsets.replace(report.offsets.clone());
        if let Err(e) = self.save_offsets(&report.offsets) {
            tracing::warn!(error = %e, "calibration is active but could not be saved");
        }
        Ok(report)
    }

    /// Replace the active offsets wholesale.
    pub fn install_offsets(&mut self, offsets: CalibrationOffsets) -> Result<()> {
        self.require_idle("changing calibration")?;
        tracing::info!(channels = offsets.len(), "calibration offsets installed");
        self.offsets.replace(offsets);
        Ok(())
    }

    /// Write `offsets` to this participant's calibration file.
    pub fn save_offsets(&self, offsets: &CalibrationOffsets) -> Result<PathBuf> {
        let bytes = offsets.to_csv_bytes()?;
        let path = self.paths.calibration();
        write_with_retry(
            self.storage.as_ref(),
            self.clock.as_ref(),
            &self.retry,
            &path,
            |s, p| s.create(p, &bytes),
        )?;
        tracing::info!(path = %path.display(), "calibration saved");
        Ok(path)
    }

    /// Snapshot every sample collected so far into a new timestamped file.
    pub fn export_all(&self) -> Result<ExportReport> {
        let stamp = export_stamp();
        let result = self
            .writer
            .export_snapshot(&self.paths.backup(&stamp), &self.paths.backup_alt(&stamp));
        match &result {
            Ok(r) => self.notifier.send(Notification::ExportWritten {
                path: r.path.clone(),
                rows: r.rows,
            }),
            Err(e) => {
                tracing::error!(error = %e, "export failed");
                self.notifier.send(Notification::ExportFailed {
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    /// Best-effort export before an abnormal exit.
    pub fn emergency_export(&self) -> Option<PathBuf> {
        if self.log.is_empty() {
            tracing::info!("no samples collected; nothing to preserve");
            return None;
        }
        match self.export_all() {
            Ok(r) => {
                tracing::warn!(path = %r.path.display(), rows = r.rows, "emergency export written");
                Some(r.path)
            }
            Err(e) => {
                tracing::error!(error = %e, "emergency export failed");
                None
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            participant: self.participant.clone(),
            total_trials: self.state.total_completed(),
            per_condition: self
                .state
                .order
                .iter()
                .map(|c| (c.clone(), self.state.completed(c)))
                .collect(),
            samples: self.log.len(),
        }
    }

    pub fn status(&self) -> StatusReport {
        let condition = self
            .active
            .as_ref()
            .map_or_else(|| self.state.current_condition.clone(), |e| e.context().condition.clone());
        StatusReport {
            phase: self.phase(),
            trial: self.state.trial_index,
            completed: self.state.completed(&condition),
            condition,
            target: self.cfg.trials_per_condition,
            trial_samples: self.buffer.len(),
            total_samples: self.log.len(),
            elapsed_s: self.trial_elapsed(),
            last_reading: self.buffer.last().map(|s| (s.raw, s.corrected)),
        }
    }

    /// Stop any running trial (it counts and is saved), then drain the worker.
    pub fn shutdown(mut self) -> ShutdownReport {
        if self.active.is_some() {
            if let Err(e) = self.stop_trial() {
                tracing::error!(error = %e, "could not stop the running trial");
            }
        }
        self.phase = TrialPhase::Ended;
        let summary = self.summary();
        let had_data = !self.log.is_empty();
        let worker = self.worker.shutdown();
        if !had_data {
            tracing::info!("session closed without data");
        }
        ShutdownReport {
            summary,
            worker,
            had_data,
        }
    }
}
