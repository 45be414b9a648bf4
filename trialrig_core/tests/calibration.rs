//! Calibration procedure against scripted channels and a manual clock.

use std::sync::Arc;
use std::time::Duration;

use trialrig_core::calibration::{CalibrationProcedure, CancelToken};
use trialrig_core::error::{RigError, rig_error};
use trialrig_core::mocks::{ConstReader, FailingReader, ScriptedReader};
use trialrig_core::notify::{Notification, Notifier};
use trialrig_core::offsets::OffsetStore;
use trialrig_traits::clock::test_clock::TestClock;

fn procedure(clock: &TestClock, secs: f64) -> CalibrationProcedure {
    CalibrationProcedure::new(
        Duration::from_secs_f64(secs),
        Duration::from_millis(10),
        Arc::new(clock.clone()),
    )
}

#[test]
fn all_zero_input_gives_zero_offsets() {
    let clock = TestClock::new();
    let mut reader = ConstReader::new(0.0, 3);
    let report = procedure(&clock, 0.5)
        .run(&mut reader, &[0, 1, 2], &CancelToken::new())
        .unwrap();
    for ch in 0..3 {
        assert_eq!(report.offsets.get(ch), Some(0.0));
        assert!(report.counts[&ch] > 1);
    }
    assert!(report.zero_sample_channels.is_empty());
}

#[test]
fn offset_is_the_mean_of_readings() {
    let clock = TestClock::new();
    // duration 0 still takes one sweep; channel 1 gets two sweeps worth of script
    let mut reader = ScriptedReader::new()
        .channel(0, [Some(0.4), Some(0.6)])
        .channel(1, [Some(1.0), Some(3.0)]);
    let report = procedure(&clock, 0.01)
        .with_settle(Duration::ZERO)
        .run(&mut reader, &[0, 1], &CancelToken::new())
        .unwrap();
    assert_eq!(report.counts[&0], 2);
    assert!((report.offsets.offset(0) - 0.5).abs() < 1e-12);
    assert!((report.offsets.offset(1) - 2.0).abs() < 1e-12);
}

#[test]
fn silent_channel_is_zero_with_warning() {
    let clock = TestClock::new();
    let (notifier, rx) = Notifier::channel();
    let mut reader = ScriptedReader::new()
        .channel(0, std::iter::repeat_n(Some(0.3), 200))
        .channel(2, std::iter::empty());
    let report = procedure(&clock, 0.2)
        .with_notifier(notifier)
        .run(&mut reader, &[0, 2], &CancelToken::new())
        .unwrap();

    assert_eq!(report.zero_sample_channels, vec![2]);
    assert_eq!(report.offsets.get(2), Some(0.0));
    assert!(report.failed_reads > 0);
    let warned = rx
        .try_iter()
        .any(|n| matches!(n, Notification::CalibrationWarning { channel: 2, .. }));
    assert!(warned);
}

#[test]
fn every_read_failing_is_a_procedure_failure() {
    let clock = TestClock::new();
    let mut reader = FailingReader::new(2);
    let err = procedure(&clock, 0.1)
        .run(&mut reader, &[0, 1], &CancelToken::new())
        .unwrap_err();
    assert!(matches!(rig_error(&err), Some(RigError::Calibration(_))));
}

#[test]
fn cancelled_run_leaves_active_offsets_alone() {
    let clock = TestClock::new();
    let store = OffsetStore::new([(0, 0.42)].into_iter().collect());
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut reader = ConstReader::new(1.0, 1);
    let err = procedure(&clock, 5.0)
        .run(&mut reader, &[0], &cancel)
        .unwrap_err();
    assert!(matches!(rig_error(&err), Some(RigError::Cancelled)));
    assert_eq!(store.snapshot().get(0), Some(0.42));
}

#[test]
fn settles_first_and_reports_progress() {
    let clock = TestClock::new();
    let (notifier, rx) = Notifier::channel();
    let mut reader = ConstReader::new(0.5, 1);
    procedure(&clock, 3.0)
        .with_notifier(notifier)
        .run(&mut reader, &[0], &CancelToken::new())
        .unwrap();

    // 1 s settle + 3 s window
    let elapsed = clock.elapsed();
    assert!(elapsed >= Duration::from_secs(4), "elapsed {elapsed:?}");
    let progress: Vec<Duration> = rx
        .try_iter()
        .filter_map(|n| match n {
            Notification::CalibrationProgress { remaining } => Some(remaining),
            _ => None,
        })
        .collect();
    assert!(progress.len() >= 3);
    assert_eq!(progress.last(), Some(&Duration::ZERO));
}

#[test]
fn no_channels_is_an_error() {
    let clock = TestClock::new();
    let mut reader = ConstReader::new(0.5, 0);
    let err = procedure(&clock, 1.0)
        .run(&mut reader, &[], &CancelToken::new())
        .unwrap_err();
    assert!(matches!(rig_error(&err), Some(RigError::Calibration(_))));
}
