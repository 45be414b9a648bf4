//! Events sent from the engine's threads back to the control surface.
//!
//! Background activities never touch operator-facing state directly; they post a
//! `Notification` and the owner of the receiver decides how to show it.

use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel as xch;
use trialrig_traits::ChannelId;

use crate::status::{SessionSummary, TrialPhase};

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Phase {
        phase: TrialPhase,
        trial: u32,
        condition: String,
    },
    ConditionChanged {
        condition: String,
        completed: u32,
        target: u32,
    },
    TrialSaved {
        trial: u32,
        rows: usize,
    },
    SaveFailed {
        trial: u32,
        reason: String,
    },
    CalibrationProgress {
        remaining: Duration,
    },
    CalibrationWarning {
        channel: ChannelId,
        message: String,
    },
    ExperimentComplete(SessionSummary),
    ExportWritten {
        path: PathBuf,
        rows: usize,
    },
    ExportFailed {
        reason: String,
    },
}

/// Sending half of the notification channel. Cloneable; a dropped receiver is
/// not an error.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<xch::Sender<Notification>>,
}

impl Notifier {
    pub fn channel() -> (Self, xch::Receiver<Notification>) {
        let (tx, rx) = xch::unbounded();
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, n: Notification) {
        if let Some(tx) = &self.tx {
            if tx.send(n).is_err() {
                tracing::trace!("notification receiver gone");
            }
        }
    }
}
