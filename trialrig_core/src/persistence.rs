//! Durable trial log and the background writer that feeds it.
//!
//! `TrialLogWriter` knows how to put one trial's rows on disk (header first,
//! exactly once) and how to export the full history. `PersistenceWorker` owns a
//! thread that applies `TrialLogWriter::append_trial` to queued trial indices in
//! FIFO order, so acquisition never waits on storage.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel as xch;
use trialrig_traits::Storage;

use crate::SharedClock;
use crate::error::{Result, RigError};
use crate::notify::{Notification, Notifier};
use crate::record::{LogHeader, rows_bytes};
use crate::retry::{RetryPolicy, write_with_retry};
use crate::sample::SampleLog;

pub struct TrialLogWriter {
    storage: Arc<dyn Storage>,
    clock: SharedClock,
    retry: RetryPolicy,
    path: PathBuf,
    header: LogHeader,
    log: SampleLog,
    header_written: Mutex<bool>,
}

/// A finished full-history export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub rows: usize,
}

impl TrialLogWriter {
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: SharedClock,
        retry: RetryPolicy,
        path: PathBuf,
        header: LogHeader,
        log: SampleLog,
    ) -> Self {
        Self {
            storage,
            clock,
            retry,
            path,
            header,
            log,
            header_written: Mutex::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    pub fn header_written(&self) -> bool {
        *self
            .header_written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the header unless this writer already did. Returns true if it was
    /// written by this call.
    ///
    /// Concurrent callers serialize on the guard; only one can write. An existing
    /// file from an earlier run is replaced.
    pub fn ensure_header(&self) -> Result<bool> {
        let mut done = self
            .header_written
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *done {
            return Ok(false);
        }
        let bytes = self.header.to_bytes()?;
        write_with_retry(
            self.storage.as_ref(),
            self.clock.as_ref(),
            &self.retry,
            &self.path,
            |s, p| s.create(p, &bytes),
        )?;
        *done = true;
        tracing::info!(path = %self.path.display(), "trial log header written");
        Ok(true)
    }

    /// Append every row of `trial`. Returns the number of rows written.
    pub fn append_trial(&self, trial: u32) -> Result<usize> {
        self.ensure_header()?;
        let rows = self.log.trial_rows(trial);
        if rows.is_empty() {
            tracing::warn!(trial, "trial has no samples; nothing appended");
            return Ok(0);
        }
        let bytes = rows_bytes(&rows, self.header.force_factor)?;
        write_with_retry(
            self.storage.as_ref(),
            self.clock.as_ref(),
            &self.retry,
            &self.path,
            |s, p| s.append(p, &bytes),
        )?;
        Ok(rows.len())
    }

    /// Write header plus every row of every channel to `target`, fresh.
    ///
    /// Independent of the incremental log. If `target` stays locked, one attempt
    /// goes to `alternate`.
    pub fn export_snapshot(&self, target: &Path, alternate: &Path) -> Result<ExportReport> {
        let rows = self.log.snapshot();
        let mut bytes = self.header.to_bytes()?;
        bytes.extend(rows_bytes(&rows, self.header.force_factor)?);

        let first = write_with_retry(
            self.storage.as_ref(),
            self.clock.as_ref(),
            &self.retry,
            target,
            |s, p| s.create(p, &bytes),
        );
        let path = match first {
            Ok(_) => target.to_path_buf(),
            Err(e) if matches!(e.downcast_ref::<RigError>(), Some(RigError::StorageLocked(_))) => {
                tracing::warn!(
                    target = %target.display(),
                    alternate = %alternate.display(),
                    "export target locked; trying alternate name"
                );
                write_with_retry(
                    self.storage.as_ref(),
                    self.clock.as_ref(),
                    &RetryPolicy::once(),
                    alternate,
                    |s, p| s.create(p, &bytes),
                )?;
                alternate.to_path_buf()
            }
            Err(e) => return Err(e),
        };
        tracing::info!(path = %path.display(), rows = rows.len(), "full history exported");
        Ok(ExportReport {
            path,
            rows: rows.len(),
        })
    }
}

enum PersistMsg {
    Trial(u32),
    Stop,
}

/// Counts kept by the worker thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub saved: u32,
    pub failed: u32,
}

pub struct PersistenceWorker {
    tx: xch::Sender<PersistMsg>,
    join_handle: Option<JoinHandle<WorkerReport>>,
}

impl PersistenceWorker {
    pub fn spawn(writer: Arc<TrialLogWriter>, notifier: Notifier) -> Self {
        let (tx, rx) = xch::unbounded::<PersistMsg>();
        let join_handle = std::thread::spawn(move || {
            let mut report = WorkerReport::default();
            for msg in &rx {
                match msg {
                    PersistMsg::Trial(trial) => match writer.append_trial(trial) {
                        Ok(rows) => {
                            report.saved += 1;
                            tracing::info!(trial, rows, path = %writer.path().display(), "trial saved");
                            notifier.send(Notification::TrialSaved { trial, rows });
                        }
                        Err(e) => {
                            report.failed += 1;
                            tracing::error!(trial, error = %e, "trial could not be saved; use export");
                            notifier.send(Notification::SaveFailed {
                                trial,
                                reason: e.to_string(),
                            });
                        }
                    },
                    PersistMsg::Stop => {
                        tracing::debug!("persistence worker received stop");
                        break;
                    }
                }
            }
            report
        });
        Self {
            tx,
            join_handle: Some(join_handle),
        }
    }

    /// Queue `trial` for saving. Never blocks on storage.
    pub fn enqueue(&self, trial: u32) -> Result<()> {
        self.tx.send(PersistMsg::Trial(trial)).map_err(|_| {
            eyre::Report::new(RigError::Storage(
                "persistence worker is not running".into(),
            ))
        })?;
        tracing::debug!(trial, "trial queued for saving");
        Ok(())
    }

    /// Send the stop sentinel and wait until everything queued before it is written.
    pub fn shutdown(mut self) -> WorkerReport {
        self.finish()
    }

    fn finish(&mut self) -> WorkerReport {
        let Some(handle) = self.join_handle.take() else {
            return WorkerReport::default();
        };
        let _ = self.tx.send(PersistMsg::Stop);
        match handle.join() {
            Ok(report) => {
                tracing::info!(saved = report.saved, failed = report.failed, "persistence worker stopped");
                report
            }
            Err(e) => {
                tracing::error!(?e, "persistence worker panicked");
                WorkerReport::default()
            }
        }
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        if self.join_handle.is_some() {
            let _ = self.finish();
        }
    }
}
