//! Byte layout of the persisted trial log.
//!
//! ```text
//! # Participant ID:,P07
//! # Counterbalancing Order:,"B, A, C"
//! # Bridge Gain:,128
//! # Sampling Frequency (Hz):,100
//! # Force Calibration Factor:,1841.0,N/(V/V)
//!
//! Trial,Viscosity,Channel,Gain,Timestamp,Raw_Reading,Calibrated_Reading,Force_N
//! 1,B,1,128,0.01,0.30012,0.00031,0.57071
//! ```
//!
//! Lines end with CRLF.

use crate::error::{Result, RigError};
use crate::sample::Sample;
use crate::util::{fmt_float, fmt_frequency};

pub const COLUMNS: [&str; 8] = [
    "Trial",
    "Viscosity",
    "Channel",
    "Gain",
    "Timestamp",
    "Raw_Reading",
    "Calibrated_Reading",
    "Force_N",
];

/// Session metadata written once at the top of the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogHeader {
    pub participant: String,
    pub order: Vec<String>,
    pub gain: u32,
    pub sampling_frequency_hz: f64,
    pub force_factor: f64,
}

fn writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .flexible(true)
        .has_headers(false)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new())
}

fn finish(w: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    w.into_inner()
        .map_err(|e| eyre::Report::new(RigError::Storage(e.error().to_string())))
}

fn csv_err(e: &csv::Error) -> eyre::Report {
    eyre::Report::new(RigError::Storage(format!("encode log: {e}")))
}

impl LogHeader {
    /// Metadata block, blank line and column row.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = writer();
        let order = self.order.join(", ");
        let gain = self.gain.to_string();
        let freq = fmt_frequency(self.sampling_frequency_hz);
        let factor = fmt_float(self.force_factor);
        let meta: [&[&str]; 5] = [
            &["# Participant ID:", self.participant.as_str()],
            &["# Counterbalancing Order:", order.as_str()],
            &["# Bridge Gain:", gain.as_str()],
            &["# Sampling Frequency (Hz):", freq.as_str()],
            &["# Force Calibration Factor:", factor.as_str(), "N/(V/V)"],
        ];
        for rec in meta {
            w.write_record(rec).map_err(|e| csv_err(&e))?;
        }
        let mut out = finish(w)?;
        out.extend_from_slice(b"\r\n");

        let mut w = writer();
        w.write_record(COLUMNS).map_err(|e| csv_err(&e))?;
        out.extend(finish(w)?);
        Ok(out)
    }
}

/// Data rows for `samples`, in the given order.
pub fn rows_bytes(samples: &[Sample], force_factor: f64) -> Result<Vec<u8>> {
    let mut w = writer();
    for s in samples {
        w.write_record([
            s.trial.to_string(),
            s.condition.clone(),
            s.channel.to_string(),
            s.gain.to_string(),
            fmt_float(s.timestamp),
            fmt_float(s.raw),
            fmt_float(s.corrected),
            fmt_float(s.corrected * force_factor),
        ])
        .map_err(|e| csv_err(&e))?;
    }
    finish(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn header_layout_is_exact() {
        let h = LogHeader {
            participant: "7".into(),
            order: vec!["A".into(), "B".into(), "C".into()],
            gain: 128,
            sampling_frequency_hz: 100.0,
            force_factor: 1841.0,
        };
        let text = String::from_utf8(h.to_bytes().unwrap()).unwrap();
        assert_eq!(
            text,
            "# Participant ID:,7\r\n\
             # Counterbalancing Order:,\"A, B, C\"\r\n\
             # Bridge Gain:,128\r\n\
             # Sampling Frequency (Hz):,100\r\n\
             # Force Calibration Factor:,1841.0,N/(V/V)\r\n\
             \r\n\
             Trial,Viscosity,Channel,Gain,Timestamp,Raw_Reading,Calibrated_Reading,Force_N\r\n"
        );
    }

    #[test]
    fn row_derives_force_from_corrected() {
        let s = Sample {
            trial: 3,
            condition: "B".into(),
            channel: 1,
            gain: 64,
            timestamp: 0.25,
            raw: 0.75,
            corrected: 0.5,
        };
        let text = String::from_utf8(rows_bytes(&[s], 2.0).unwrap()).unwrap();
        assert_eq!(text, "3,B,1,64,0.25,0.75,0.5,1.0\r\n");
    }

    #[rstest]
    #[case(5e-05, "5e-05")]
    #[case(1.2e-06, "1.2e-06")]
    #[case(-3.5e-07, "-3.5e-07")]
    #[case(0.0001, "0.0001")]
    #[case(1e16, "1e+16")]
    #[case(1.2345678901234568e17, "1.2345678901234568e+17")]
    #[case(1e-300, "1e-300")]
    #[case(1841.0, "1841.0")]
    #[case(123_456.0, "123456.0")]
    #[case(0.0, "0.0")]
    fn floats_use_signed_two_digit_exponents(#[case] v: f64, #[case] want: &str) {
        assert_eq!(fmt_float(v), want);
    }

    #[test]
    fn tiny_readings_keep_log_float_layout() {
        let s = Sample {
            trial: 1,
            condition: "A".into(),
            channel: 0,
            gain: 128,
            timestamp: 0.01,
            raw: 5e-05,
            corrected: 1.2e-06,
        };
        let text = String::from_utf8(rows_bytes(&[s], 1841.0).unwrap()).unwrap();
        assert_eq!(text, "1,A,0,128,0.01,5e-05,1.2e-06,0.0022091999999999997\r\n");
    }
}
