#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse errors and validation errors are fine; panics are not.
    let Ok(mut cfg) = trialrig_config::load_toml(data) else {
        return;
    };
    let _ = cfg.sanitize();
    if cfg.validate().is_ok() {
        // anything that survives sanitize + validate must build a runtime config
        assert!(trialrig_core::SessionCfg::try_from(&cfg).is_ok());
    }
});
