#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Trial execution and persistence engine (hardware-agnostic).
//!
//! All sensor access goes through `trialrig_traits::ChannelReader`, time through
//! `trialrig_traits::Clock` and durable writes through `trialrig_traits::Storage`.
//!
//! ## Architecture
//!
//! - **Scheduling**: counterbalanced condition order per participant (`scheduler`)
//! - **Calibration**: averaged per-channel offsets, cancellable (`calibration`, `offsets`)
//! - **State machine**: idle → countdown → recording ⇄ paused → stop (`session`)
//! - **Sampling**: one thread per trial on a fixed monotonic grid (`sampler`)
//! - **Persistence**: FIFO background writer with bounded retry (`persistence`, `retry`)
//!
//! ## Threads
//!
//! The caller's thread owns the `TrialStateMachine`. Sampling and persistence each
//! run on a thread the machine starts and joins; they talk back through
//! `notify::Notifier` and share only the append-only `sample::SampleLog`.

use std::sync::{Arc, Mutex};

use trialrig_traits::{ChannelReader, Clock};

pub mod calibration;
pub mod config;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod notify;
pub mod offsets;
pub mod paths;
pub mod persistence;
pub mod record;
pub mod retry;
pub mod runner;
pub mod sample;
pub mod sampler;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod storage;
pub mod util;

/// Channel source shared between the sampler, calibration and the state machine.
pub type SharedReader = Arc<Mutex<dyn ChannelReader + Send>>;
/// Clock shared across the engine's threads.
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

pub use calibration::{CalibrationProcedure, CalibrationReport, CancelToken};
pub use config::SessionCfg;
pub use error::{Result, RigError};
pub use notify::{Notification, Notifier};
pub use offsets::{CalibrationOffsets, OffsetStore};
pub use paths::SessionPaths;
pub use persistence::{ExportReport, PersistenceWorker, TrialLogWriter};
pub use retry::{Backoff, RetryPolicy};
pub use sample::{Sample, SampleLog, TrialBuffer};
pub use sampler::SamplingEngine;
pub use scheduler::order_for;
pub use session::{ExperimentState, SessionBuilder, ShutdownReport, TrialStateMachine};
pub use status::{SessionSummary, StatusReport, StopOutcome, Toggled, TrialPhase};
pub use storage::FsStorage;
