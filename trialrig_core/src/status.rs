//! Trial phases and the results of operator commands.

use std::time::Duration;

/// Where the session is in the trial cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrialPhase {
    /// Ready for the next trial; the condition may be changed.
    Idle = 0,
    Countdown = 1,
    Recording = 2,
    Paused = 3,
    /// Every condition reached its target; waiting for continue or end.
    ExperimentComplete = 4,
    Ended = 5,
}

impl TrialPhase {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Countdown,
            2 => Self::Recording,
            3 => Self::Paused,
            4 => Self::ExperimentComplete,
            5 => Self::Ended,
            _ => Self::Idle,
        }
    }

    /// True while a sampling thread exists for the trial.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Countdown | Self::Recording | Self::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Countdown => "countdown",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::ExperimentComplete => "experiment complete",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for TrialPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Totals reported when the experiment completes or the session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub participant: String,
    /// Trials that were stopped after recording began.
    pub total_trials: u32,
    /// Completed count per condition, in scheduled order.
    pub per_condition: Vec<(String, u32)>,
    pub samples: usize,
}

/// What `stop_trial` led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Trial counted; ready for `trial` on `condition`.
    NextTrial {
        trial: u32,
        condition: String,
        condition_changed: bool,
    },
    /// Trial counted and it was the last one scheduled.
    ExperimentComplete(SessionSummary),
    /// Stopped before recording began; nothing counted or saved.
    Aborted { trial: u32 },
}

/// Result of a pause toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggled {
    Paused,
    /// Recording again after a pause of this length.
    Resumed(Duration),
}

/// Point-in-time view for the control surface.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub phase: TrialPhase,
    pub trial: u32,
    pub condition: String,
    pub completed: u32,
    pub target: u32,
    /// Samples in the live trial buffer.
    pub trial_samples: usize,
    pub total_samples: usize,
    /// Pause-adjusted seconds into the running trial.
    pub elapsed_s: Option<f64>,
    /// Latest (raw, corrected) reading of the running trial.
    pub last_reading: Option<(f64, f64)>,
}
