use rstest::rstest;
use trialrig_config::load_toml;

#[test]
fn empty_document_uses_defaults() {
    let cfg = load_toml("").expect("parse empty TOML");
    assert_eq!(cfg.session.sampling_frequency_hz, 100.0);
    assert_eq!(cfg.session.trials_per_condition, 5);
    assert_eq!(cfg.session.bridge_gain, 128);
    assert_eq!(cfg.session.condition_labels, vec!["A", "B", "C"]);
    assert_eq!(cfg.persistence.max_attempts, 3);
    assert_eq!(cfg.persistence.retry_delay_ms, 500);
    cfg.validate().expect("defaults are valid");
}

#[test]
fn sanitize_replaces_zero_frequency_with_default() {
    let toml = r#"
[session]
sampling_frequency_hz = 0
trials_per_condition = 0
"#;
    let mut cfg = load_toml(toml).expect("parse TOML");
    let fixed = cfg.sanitize();
    assert_eq!(cfg.session.sampling_frequency_hz, 100.0);
    assert_eq!(cfg.session.trials_per_condition, 1);
    assert_eq!(fixed.len(), 2);
    assert!(fixed[0].contains("sampling_frequency_hz"));
    cfg.validate().expect("sanitized config validates");
}

#[test]
fn sanitize_is_silent_for_good_config() {
    let mut cfg = load_toml("[session]\nsampling_frequency_hz = 250\n").expect("parse TOML");
    assert!(cfg.sanitize().is_empty());
    assert_eq!(cfg.session.sampling_frequency_hz, 250.0);
}

#[test]
fn unsanitized_zero_frequency_is_rejected() {
    let cfg = load_toml("[session]\nsampling_frequency_hz = -5.0\n").expect("parse TOML");
    let err = cfg.validate().expect_err("negative frequency");
    assert!(format!("{err}").contains("sampling_frequency_hz must be > 0"));
}

#[rstest]
#[case("condition_labels = []", "at least one condition")]
#[case(r#"condition_labels = ["A", "B", "A"]"#, "duplicate label")]
#[case(r#"condition_labels = ["A", " "]"#, "is empty")]
#[case("num_channels = 2", "only 2 channels")]
#[case("bridge_gain = 100", "bridge_gain must be one of")]
fn rejects_bad_session(#[case] line: &str, #[case] needle: &str) {
    let toml = format!("[session]\n{line}\n");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("invalid session");
    assert!(
        format!("{err}").contains(needle),
        "expected {needle:?} in {err}"
    );
}

#[test]
fn rejects_unknown_rotation() {
    let cfg = load_toml("[logging]\nrotation = \"weekly\"\n").expect("parse TOML");
    let err = cfg.validate().expect_err("weekly is not supported");
    assert!(format!("{err}").contains("never|daily|hourly"));
}

#[test]
fn parses_hardware_pins_and_backoff() {
    let toml = r#"
[persistence]
backoff = "exponential"
max_delay_ms = 100

[hardware]
read_timeout_ms = 250
channels = [{ dt = 5, sck = 6 }, { dt = 17, sck = 27 }]
"#;
    let mut cfg = load_toml(toml).expect("parse TOML");
    assert_eq!(cfg.persistence.backoff, trialrig_config::Backoff::Exponential);
    assert_eq!(cfg.hardware.channels.len(), 2);
    assert_eq!(cfg.hardware.channels[1].dt, 17);
    // max_delay below retry_delay is raised
    let fixed = cfg.sanitize();
    assert_eq!(fixed.len(), 1);
    assert_eq!(cfg.persistence.max_delay_ms, 500);
}

#[test]
fn unknown_backoff_fails_to_parse() {
    assert!(load_toml("[persistence]\nbackoff = \"random\"\n").is_err());
}
