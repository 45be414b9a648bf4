//! Sampling thread lifecycle: prompt stop, join on drop, skipped reads.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use trialrig_core::mocks::{ConstReader, ScriptedReader};
use trialrig_core::sampler::{SamplerSetup, SamplingEngine, TrialContext};
use trialrig_core::{CalibrationOffsets, Notifier, SampleLog, SharedReader, TrialBuffer, TrialPhase};
use trialrig_traits::ChannelReader;
use trialrig_traits::clock::MonotonicClock;

fn setup(reader: SharedReader, countdown: Duration) -> (SamplerSetup, SampleLog, TrialBuffer) {
    let log = SampleLog::new();
    let buffer = TrialBuffer::new();
    let setup = SamplerSetup {
        ctx: TrialContext {
            trial: 1,
            condition: "A".into(),
            channel: 0,
            gain: 128,
        },
        reader,
        offsets: Arc::new(CalibrationOffsets::default()),
        log: log.clone(),
        buffer: buffer.clone(),
        clock: Arc::new(MonotonicClock::new()),
        interval: Duration::from_millis(10),
        countdown,
        notifier: Notifier::disabled(),
    };
    (setup, log, buffer)
}

fn shared<R: ChannelReader + Send + 'static>(reader: R) -> SharedReader {
    Arc::new(Mutex::new(reader))
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn engine_thread_exits_on_drop() {
    let (s, log, _) = setup(shared(ConstReader::new(0.5, 1)), Duration::ZERO);
    let engine = SamplingEngine::spawn(s);
    wait_until(|| !log.is_empty());
    drop(engine);

    let after_drop = log.len();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(log.len(), after_drop, "no samples after the thread is joined");
}

#[test]
fn engines_can_be_created_and_dropped_repeatedly() {
    let reader = shared(ConstReader::new(0.5, 1));
    for _ in 0..10 {
        let (s, _, _) = setup(Arc::clone(&reader), Duration::ZERO);
        let engine = SamplingEngine::spawn(s);
        std::thread::sleep(Duration::from_millis(10));
        drop(engine);
    }
}

#[test]
fn stop_is_prompt() {
    let (s, _, buffer) = setup(shared(ConstReader::new(0.5, 1)), Duration::ZERO);
    let engine = SamplingEngine::spawn(s);
    wait_until(|| buffer.len() >= 2);

    let start = Instant::now();
    let report = engine.stop();
    let took = start.elapsed();
    assert!(report.reached_recording);
    assert!(report.samples >= 2);
    assert!(took < Duration::from_millis(200), "stop took {took:?}");
}

#[test]
fn stop_during_long_countdown_is_prompt_and_records_nothing() {
    let (s, log, _) = setup(shared(ConstReader::new(0.5, 1)), Duration::from_secs(60));
    let engine = SamplingEngine::spawn(s);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(engine.phase(), TrialPhase::Countdown);

    let start = Instant::now();
    let report = engine.stop();
    assert!(start.elapsed() < Duration::from_millis(200));
    assert!(!report.reached_recording);
    assert_eq!(report.samples, 0);
    assert!(log.is_empty());
}

#[test]
fn failed_reads_are_skipped_not_recorded() {
    let reader = ScriptedReader::new()
        .channel(0, [Some(0.1), None, None, Some(0.2)])
        .with_fallback(0.3);
    let (s, log, _) = setup(shared(reader), Duration::ZERO);
    let engine = SamplingEngine::spawn(s);
    wait_until(|| log.len() >= 4);
    let report = engine.stop();

    assert_eq!(report.skipped, 2);
    let raws: Vec<f64> = log.snapshot().iter().map(|s| s.raw).take(3).collect();
    assert_eq!(raws, [0.1, 0.2, 0.3]);
    assert_eq!(report.samples, log.len());
}

#[test]
fn samples_are_spaced_on_the_grid() {
    let (s, log, _) = setup(shared(ConstReader::new(0.5, 1)), Duration::ZERO);
    let engine = SamplingEngine::spawn(s);
    wait_until(|| log.len() >= 10);
    engine.stop();

    let stamps: Vec<f64> = log.snapshot().iter().map(|s| s.timestamp).collect();
    assert!(stamps[0] >= 0.01 - 1e-3, "first tick is one interval in");
    assert!(stamps.windows(2).all(|w| w[1] > w[0]));
}
