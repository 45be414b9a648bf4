//! Interactive session driver: stdin commands, Ctrl-C, and operator output.
//!
//! The state machine lives on the main thread. A reader thread turns stdin
//! lines into `Input`s. Ctrl-C during a `recalibrate` abandons only that
//! calibration; at any other time it asks the loop to wind down. Engine notifications are printed from their
//! own thread as they arrive.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel as xch;
use serde_json::json;
use trialrig_core::error::rig_error;
use trialrig_core::runner::{Command, Reply, execute};
use trialrig_core::{
    CalibrationOffsets, CalibrationReport, CancelToken, Notification, Notifier, RetryPolicy,
    RigError, SessionCfg, SessionPaths, SessionSummary, StopOutcome, TrialStateMachine,
};

use crate::cli::SourceArgs;
use crate::hw;

enum Input {
    Line(String),
    Eof,
    Interrupt,
}

/// Routes Ctrl-C either to the running calibration or to the command loop.
#[derive(Clone)]
struct InterruptRouter {
    cancel: CancelToken,
    calibrating: Arc<AtomicBool>,
    tx: xch::Sender<Input>,
}

impl InterruptRouter {
    fn new(cancel: CancelToken, tx: xch::Sender<Input>) -> Self {
        Self {
            cancel,
            calibrating: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    fn set_calibrating(&self, on: bool) {
        self.calibrating.store(on, Ordering::Release);
    }

    fn interrupt(&self) {
        self.cancel.cancel();
        if self.calibrating.load(Ordering::Acquire) {
            tracing::warn!("calibration abandoned; session continues");
        } else {
            let _ = self.tx.send(Input::Interrupt);
        }
    }
}

/// How the session should get its offsets.
#[derive(Debug, Clone)]
pub enum OffsetSource {
    /// Run the calibration procedure before the first trial.
    Calibrate,
    /// Load from an explicit file.
    File(PathBuf),
    /// Load the shared previous calibration, if there is one.
    Previous,
}

pub struct RunOptions {
    pub participant: String,
    pub source: SourceArgs,
    pub offsets: OffsetSource,
    pub json: bool,
}

fn build_machine(
    cfg: &trialrig_config::Config,
    participant: &str,
    source: SourceArgs,
    notifier: Notifier,
) -> eyre::Result<TrialStateMachine> {
    let session_cfg = SessionCfg::try_from(cfg)?;
    let paths = SessionPaths::prepare(&cfg.session.output_directory, participant);
    let (reader, backend) = hw::make_reader(cfg, source)?;
    tracing::info!(backend = backend.as_str(), dir = %paths.dir().display(), "session starting");
    TrialStateMachine::builder(session_cfg, participant)
        .reader(reader)
        .notifier(notifier)
        .retry(RetryPolicy::from(&cfg.persistence))
        .paths(paths)
        .build()
}

fn load_offsets(path: &Path, missing_ok: bool) -> eyre::Result<CalibrationOffsets> {
    if missing_ok && !path.exists() {
        tracing::warn!(path = %path.display(), "no previous calibration found; using zero offsets");
        return Ok(CalibrationOffsets::default());
    }
    let offsets = CalibrationOffsets::load_csv(path)?;
    tracing::info!(path = %path.display(), channels = offsets.len(), "calibration loaded");
    Ok(offsets)
}

fn spawn_printer(events: xch::Receiver<Notification>, json: bool) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for n in &events {
            if let Some(line) = render_notification(&n, json) {
                println!("{line}");
            }
        }
    })
}

fn spawn_stdin(tx: xch::Sender<Input>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if tx.send(Input::Line(l)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
        let _ = tx.send(Input::Eof);
    });
}

/// Run one participant session until `quit`, end of input or Ctrl-C.
pub fn run(cfg: &trialrig_config::Config, opts: RunOptions) -> eyre::Result<SessionSummary> {
    let (notifier, events) = Notifier::channel();
    let printer = spawn_printer(events, opts.json);
    let mut machine = build_machine(cfg, &opts.participant, opts.source, notifier)?;

    let order = machine.state().order().join(", ");
    emit(
        opts.json,
        format!("Participant {}: condition order {order}", opts.participant),
        json!({ "event": "order", "participant": opts.participant, "order": machine.state().order() }),
    );

    let cancel = CancelToken::new();
    let (tx, rx) = xch::unbounded::<Input>();
    let router = InterruptRouter::new(cancel.clone(), tx.clone());
    {
        let router = router.clone();
        if let Err(e) = ctrlc::set_handler(move || router.interrupt()) {
            tracing::warn!(error = %e, "could not install Ctrl-C handler");
        }
    }

    let prepared = match &opts.offsets {
        OffsetSource::Calibrate => machine.recalibrate(&cancel).map(|r| print_calibration(&r, opts.json)),
        OffsetSource::File(path) => {
            load_offsets(path, false).and_then(|o| machine.install_offsets(o))
        }
        OffsetSource::Previous => {
            let path = machine.paths().previous_calibration();
            load_offsets(&path, true).and_then(|o| machine.install_offsets(o))
        }
    };
    if let Err(e) = prepared {
        let report = machine.shutdown();
        let _ = printer.join();
        if matches!(rig_error(&e), Some(RigError::Cancelled)) {
            tracing::info!("calibration cancelled; session closed");
            return Ok(report.summary);
        }
        return Err(e);
    }

    spawn_stdin(tx);
    let outcome = command_loop(&mut machine, &rx, &router, opts.json);

    if let Err(e) = &outcome {
        tracing::error!(error = %e, "session failed; preserving collected data");
        if let Some(path) = machine.emergency_export() {
            eprintln!("Collected data was exported to {}", path.display());
        }
    }
    let report = machine.shutdown();
    let _ = printer.join();
    outcome?;

    print_summary(&report.summary, opts.json);
    if !report.had_data {
        emit(opts.json, "No data was collected.".into(), json!({ "event": "no_data" }));
    }
    if report.worker.failed > 0 {
        tracing::warn!(failed = report.worker.failed, "some trials were not saved to the log; use the export");
    }
    Ok(report.summary)
}

fn command_loop(
    machine: &mut TrialStateMachine,
    rx: &xch::Receiver<Input>,
    router: &InterruptRouter,
    json: bool,
) -> eyre::Result<()> {
    for input in rx {
        let line = match input {
            Input::Line(l) => l,
            Input::Eof => {
                tracing::info!("end of input");
                return Ok(());
            }
            Input::Interrupt => {
                tracing::warn!("interrupted");
                return Ok(());
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cmd = match line.parse::<Command>() {
            Ok(c) => c,
            Err(e) => {
                emit(json, format!("? {e}"), json!({ "event": "rejected", "command": line, "reason": e.to_string() }));
                continue;
            }
        };
        let recalibrating = matches!(cmd, Command::Recalibrate);
        router.set_calibrating(recalibrating);
        let result = execute(machine, cmd, &router.cancel);
        router.set_calibrating(false);
        match result {
            Ok(Reply::Quit) => return Ok(()),
            Ok(reply) => print_reply(&reply, json),
            Err(e) => match rig_error(&e) {
                Some(RigError::Fatal(_)) => return Err(e),
                _ => emit(
                    json,
                    format!("! {e}"),
                    json!({ "event": "rejected", "command": line, "reason": e.to_string() }),
                ),
            },
        }
    }
    Ok(())
}

/// Calibrate every channel and save the offsets, without running trials.
pub fn calibrate_only(
    cfg: &trialrig_config::Config,
    participant: &str,
    source: SourceArgs,
    json: bool,
) -> eyre::Result<PathBuf> {
    let (notifier, events) = Notifier::channel();
    let printer = spawn_printer(events, json);
    let mut machine = build_machine(cfg, participant, source, notifier)?;
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            tracing::warn!(error = %e, "could not install Ctrl-C handler");
        }
    }
    let result = machine.recalibrate(&cancel);
    let path = machine.paths().calibration();
    machine.shutdown();
    let _ = printer.join();
    let report = result?;
    print_calibration(&report, json);
    Ok(path)
}

fn emit(json: bool, text: String, value: serde_json::Value) {
    if json {
        println!("{value}");
    } else {
        println!("{text}");
    }
}

fn print_calibration(report: &CalibrationReport, json: bool) {
    if json {
        let offsets: serde_json::Map<String, serde_json::Value> = report
            .offsets
            .as_map()
            .iter()
            .map(|(ch, v)| (ch.to_string(), json!(v)))
            .collect();
        println!("{}", json!({ "event": "calibrated", "offsets": offsets, "zero_sample_channels": report.zero_sample_channels }));
        return;
    }
    println!("Calibration complete:");
    for (ch, v) in report.offsets.as_map() {
        let n = report.counts.get(ch).copied().unwrap_or(0);
        println!("  channel {ch}: offset {v:.6} V/V ({n} readings)");
    }
}

fn print_summary(summary: &SessionSummary, json: bool) {
    if json {
        println!(
            "{}",
            json!({
                "event": "summary",
                "participant": summary.participant,
                "total_trials": summary.total_trials,
                "per_condition": summary.per_condition,
                "samples": summary.samples,
            })
        );
        return;
    }
    println!(
        "Session {}: {} trials, {} samples",
        summary.participant, summary.total_trials, summary.samples
    );
    for (condition, n) in &summary.per_condition {
        println!("  {condition}: {n}");
    }
}

fn print_reply(reply: &Reply, json: bool) {
    let (text, value) = match reply {
        Reply::Started { trial } => (
            format!("Trial {trial}: countdown"),
            json!({ "event": "started", "trial": trial }),
        ),
        Reply::Stopped(StopOutcome::NextTrial {
            trial,
            condition,
            condition_changed,
        }) => (
            if *condition_changed {
                format!("Trial stopped. Next: trial {trial}, condition {condition} (new condition)")
            } else {
                format!("Trial stopped. Next: trial {trial}, condition {condition}")
            },
            json!({ "event": "stopped", "next_trial": trial, "condition": condition, "condition_changed": condition_changed }),
        ),
        Reply::Stopped(StopOutcome::ExperimentComplete(_)) => (
            "Trial stopped. All conditions complete; `continue` for more trials or `end`.".into(),
            json!({ "event": "stopped", "complete": true }),
        ),
        Reply::Stopped(StopOutcome::Aborted { trial }) => (
            format!("Trial {trial} aborted before recording; not counted"),
            json!({ "event": "aborted", "trial": trial }),
        ),
        Reply::Paused => ("Paused".into(), json!({ "event": "paused" })),
        Reply::Resumed { paused_for } => (
            format!("Resumed after {:.1} s", paused_for.as_secs_f64()),
            json!({ "event": "resumed", "paused_s": paused_for.as_secs_f64() }),
        ),
        Reply::Selected(label) => (
            format!("Condition {label} selected"),
            json!({ "event": "selected", "condition": label }),
        ),
        Reply::Recalibrated(report) => {
            print_calibration(report, json);
            return;
        }
        Reply::Exported(r) => (
            format!("Exported {} rows to {}", r.rows, r.path.display()),
            json!({ "event": "exported", "path": r.path.display().to_string(), "rows": r.rows }),
        ),
        Reply::Continued { trial } => (
            format!("Continuing with trial {trial}"),
            json!({ "event": "continued", "trial": trial }),
        ),
        Reply::Ended(summary) => {
            print_summary(summary, json);
            return;
        }
        Reply::Status(s) => (
            {
                let mut line = format!(
                    "{} | trial {} | condition {} ({}/{}) | {} samples this trial, {} total",
                    s.phase, s.trial, s.condition, s.completed, s.target, s.trial_samples, s.total_samples
                );
                if let Some(t) = s.elapsed_s {
                    line.push_str(&format!(" | {t:.2} s"));
                }
                if let Some((raw, corrected)) = s.last_reading {
                    line.push_str(&format!(" | last {raw:.6} ({corrected:.6} corrected)"));
                }
                line
            },
            json!({
                "event": "status",
                "phase": s.phase.as_str(),
                "trial": s.trial,
                "condition": s.condition,
                "completed": s.completed,
                "target": s.target,
                "trial_samples": s.trial_samples,
                "total_samples": s.total_samples,
                "elapsed_s": s.elapsed_s,
                "last_raw": s.last_reading.map(|r| r.0),
                "last_corrected": s.last_reading.map(|r| r.1),
            }),
        ),
        Reply::Waited(_) | Reply::Quit => return,
    };
    emit(json, text, value);
}

fn render_notification(n: &Notification, json: bool) -> Option<String> {
    let (text, value) = match n {
        Notification::Phase { phase, trial, condition } => (
            format!("[{phase}] trial {trial}, condition {condition}"),
            json!({ "event": "phase", "phase": phase.as_str(), "trial": trial, "condition": condition }),
        ),
        Notification::ConditionChanged {
            condition,
            completed,
            target,
        } => (
            format!("Condition {condition} ({completed}/{target} trials done)"),
            json!({ "event": "condition", "condition": condition, "completed": completed, "target": target }),
        ),
        Notification::TrialSaved { trial, rows } => (
            format!("Trial {trial} saved ({rows} rows)"),
            json!({ "event": "saved", "trial": trial, "rows": rows }),
        ),
        Notification::SaveFailed { trial, reason } => (
            format!("Trial {trial} NOT saved: {reason}. Use `export` to write all data."),
            json!({ "event": "save_failed", "trial": trial, "reason": reason }),
        ),
        Notification::CalibrationProgress { remaining } => (
            format!("Calibrating... {} s", remaining.as_secs()),
            json!({ "event": "calibration_progress", "remaining_s": remaining.as_secs() }),
        ),
        Notification::CalibrationWarning { channel, message } => (
            format!("Calibration warning (channel {channel}): {message}"),
            json!({ "event": "calibration_warning", "channel": channel, "message": message }),
        ),
        Notification::ExperimentComplete(s) => (
            format!("Experiment complete: {} trials", s.total_trials),
            json!({ "event": "complete", "total_trials": s.total_trials, "per_condition": s.per_condition }),
        ),
        // replies already cover exports
        Notification::ExportWritten { .. } => return None,
        Notification::ExportFailed { reason } => (
            format!("Export failed: {reason}"),
            json!({ "event": "export_failed", "reason": reason }),
        ),
    };
    Some(if json { value.to_string() } else { text })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_during_recalibration_only_cancels_it() {
        let (tx, rx) = xch::unbounded();
        let router = InterruptRouter::new(CancelToken::new(), tx);
        router.set_calibrating(true);
        router.interrupt();
        assert!(router.cancel.is_cancelled());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn interrupt_between_commands_ends_the_loop() {
        let (tx, rx) = xch::unbounded();
        let router = InterruptRouter::new(CancelToken::new(), tx);
        router.interrupt();
        assert!(matches!(rx.try_recv(), Ok(Input::Interrupt)));
    }
}
