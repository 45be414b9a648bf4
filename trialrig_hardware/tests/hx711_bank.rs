#![cfg(all(feature = "hardware", target_os = "linux"))]

use std::time::Duration;

use trialrig_hardware::Hx711Bank;
use trialrig_traits::ChannelReader;

// NOTE: These tests only work on a Raspberry Pi with the bank wired (or a GPIO
// mocking layer). Without wiring DT never goes low, so reads time out.

#[test]
fn bank_read_times_out_without_data_ready() {
    let dt_pin = 5u8; // adjust for your test rig
    let sck_pin = 6u8; // adjust for your test rig
    let mut bank = Hx711Bank::open(&[(dt_pin, sck_pin)], 128, Duration::from_millis(5))
        .expect("open gpio");
    if bank.channels().is_empty() {
        return;
    }
    let err = bank.read(0).expect_err("expect timeout");
    assert!(err.to_string().to_lowercase().contains("timeout"));
}

#[test]
fn bank_rejects_unsupported_gain() {
    let bank = Hx711Bank::open(&[(5, 6)], 16, Duration::from_millis(5)).expect("open gpio");
    assert!(bank.channels().is_empty());
}
