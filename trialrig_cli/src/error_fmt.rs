//! Human-readable error descriptions and structured JSON error formatting.

use trialrig_core::error::{CommandError, RigError, rig_error};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(re) = rig_error(err) {
        return match re {
            RigError::Conflict(msg) => format!(
                "What happened: {msg}.\nLikely causes: The command does not fit the current trial phase.\nHow to fix: Check `status`, stop or finish the current trial, then retry."
            ),
            RigError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML, or an empty participant id.\nHow to fix: Edit the config file, then rerun. Every key has a default; remove the bad one to use it."
            ),
            RigError::Hardware(msg) => format!(
                "What happened: Bridge hardware problem ({msg}).\nLikely causes: HX711 not wired, wrong [[hardware.channels]] pins, or missing GPIO permissions.\nHow to fix: Check wiring and pins, or run with --simulate to use the synthetic bridge."
            ),
            RigError::Timeout => "What happened: A channel read timed out.\nLikely causes: HX711 not powered or DT/SCK pins swapped; timeout configured too low.\nHow to fix: Verify power and pins, and consider raising hardware.read_timeout_ms.".to_string(),
            RigError::Storage(msg) => format!(
                "What happened: Could not write data ({msg}).\nLikely causes: Output directory removed, disk full, or a path that is not a directory.\nHow to fix: Check session.output_directory and free space; collected data is kept in memory until exit."
            ),
            RigError::StorageLocked(path) => format!(
                "What happened: {path} stayed locked after every retry.\nLikely causes: The file is open in a spreadsheet or another program.\nHow to fix: Close it and run `export` to write the full history to a new file."
            ),
            RigError::Calibration(msg) => format!(
                "What happened: Calibration failed ({msg}).\nLikely causes: No channel produced a reading, or the offsets CSV is malformed.\nHow to fix: Check the bridge connections; an offsets file needs the header 'Channel,Offset (VoltageRatio)'."
            ),
            RigError::Cancelled => "What happened: Cancelled by the operator.\nHow to fix: Nothing to fix; rerun when ready.".to_string(),
            RigError::Fatal(msg) => format!(
                "What happened: Unrecoverable error ({msg}).\nLikely causes: See logs.\nHow to fix: Collected data was exported if any existed; check the output directory, then restart the session."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<CommandError>() {
        return format!(
            "What happened: {ce}.\nHow to fix: Commands are start, stop, pause, resume, toggle, select <label>, recalibrate, export, continue, end, status, wait <ms>, quit."
        );
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("must have headers") {
        return "Invalid headers in offsets CSV. Expected 'Channel,Offset (VoltageRatio)'.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable process exit codes per error kind; anything untyped is 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match rig_error(err) {
        Some(RigError::Conflict(_)) => 3,
        Some(RigError::Config(_)) => 4,
        Some(RigError::Storage(_) | RigError::StorageLocked(_)) => 5,
        Some(RigError::Calibration(_)) => 6,
        Some(RigError::Fatal(_)) => 7,
        _ => 1,
    }
}

pub fn reason_name(err: &eyre::Report) -> &'static str {
    match rig_error(err) {
        Some(RigError::Conflict(_)) => "Conflict",
        Some(RigError::Config(_)) => "Config",
        Some(RigError::Hardware(_)) => "Hardware",
        Some(RigError::Timeout) => "Timeout",
        Some(RigError::Storage(_)) => "Storage",
        Some(RigError::StorageLocked(_)) => "StorageLocked",
        Some(RigError::Calibration(_)) => "Calibration",
        Some(RigError::Cancelled) => "Cancelled",
        Some(RigError::Fatal(_)) => "Fatal",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RigError::Conflict("busy".into()), 3)]
    #[case(RigError::Config("x".into()), 4)]
    #[case(RigError::StorageLocked("f.csv".into()), 5)]
    #[case(RigError::Storage("disk".into()), 5)]
    #[case(RigError::Calibration("none".into()), 6)]
    #[case(RigError::Fatal("boom".into()), 7)]
    #[case(RigError::Timeout, 1)]
    fn exit_codes_are_stable(#[case] e: RigError, #[case] code: i32) {
        assert_eq!(exit_code_for_error(&eyre::Report::new(e)), code);
    }

    #[test]
    fn json_error_carries_reason_and_hint() {
        let err = eyre::Report::new(RigError::StorageLocked("viscosity_data_7.csv".into()));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "StorageLocked");
        assert_eq!(v["exit_code"], 5);
        assert!(v["message"].as_str().unwrap().contains("export"));
    }

    #[test]
    fn untyped_errors_fall_back_to_generic_text() {
        let err = eyre::eyre!("offsets CSV must have headers 'Channel,Offset (VoltageRatio)', got: a,b");
        assert!(humanize(&err).starts_with("Invalid headers"));
        assert_eq!(reason_name(&err), "Error");
    }
}
