use std::error::Error;

use rstest::rstest;
use trialrig_core::config::SessionCfg;
use trialrig_core::error::{RigError, rig_error};
use trialrig_core::hw_error::map_hw_error;
use trialrig_hardware::error::HwError;

#[test]
fn hx711_timeout_maps_to_timeout() {
    let e: Box<dyn Error + Send + Sync> = Box::new(HwError::DataReadyTimeout);
    assert_eq!(map_hw_error(&*e), RigError::Timeout);
}

#[test]
fn detached_channel_maps_to_hardware() {
    let e: Box<dyn Error + Send + Sync> = Box::new(HwError::ChannelUnavailable(2));
    match map_hw_error(&*e) {
        RigError::Hardware(msg) => assert!(msg.contains("channel 2")),
        other => panic!("unexpected error variant: {other:?}"),
    }
}

#[rstest]
#[case("sensor timeout", RigError::Timeout)]
#[case("read timed out", RigError::Timeout)]
#[case("bus error", RigError::Hardware("bus error".into()))]
fn foreign_errors_fall_back_to_message(#[case] msg: &str, #[case] want: RigError) {
    let e: Box<dyn Error + Send + Sync> = msg.into();
    assert_eq!(map_hw_error(&*e), want);
}

#[rstest]
#[case(0.0)]
#[case(-100.0)]
#[case(f64::NAN)]
fn zero_frequency_fails_fast(#[case] hz: f64) {
    let err = SessionCfg::new(hz, vec!["A".into()]).unwrap_err();
    assert!(matches!(rig_error(&err), Some(RigError::Config(_))));
}

#[test]
fn empty_condition_list_is_config_error() {
    let err = SessionCfg::new(100.0, Vec::new()).unwrap_err();
    assert!(matches!(rig_error(&err), Some(RigError::Config(_))));
}
