#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and calibration-offset persistence for the trial rig.
//!
//! - `Config` and its sections are deserialized from TOML. Every key has a
//!   default, so an empty document is a usable configuration.
//! - `Config::sanitize` repairs recoverable mistakes in place and reports what it
//!   changed; `Config::validate` rejects what cannot be repaired.
//! - The offsets CSV loader enforces headers and skips malformed rows.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Sampling frequency substituted when the configured one is unusable.
pub const DEFAULT_SAMPLING_FREQUENCY_HZ: f64 = 100.0;
/// Bridge gain substituted when the configured one is zero.
pub const DEFAULT_BRIDGE_GAIN: u32 = 128;
/// Gains the bridge amplifier can be set to.
pub const SUPPORTED_GAINS: [u32; 8] = [1, 2, 4, 8, 16, 32, 64, 128];
/// N per V/V for the load cells used in the syringe rig.
pub const DEFAULT_FORCE_FACTOR: f64 = 1841.0;

/// Float text as written to every CSV this crate family produces.
///
/// Shortest digits that parse back to `v`, laid out the way the lab's analysis
/// scripts expect: positional between 1e-4 and 1e16 (`0.0001`, `1841.0`),
/// otherwise exponent form with a signed, two-digit minimum exponent
/// (`5e-05`, `1.2e-06`, `1e+16`).
pub fn fmt_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0.0".into() } else { "0.0".into() };
    }
    // `{:e}` already yields the shortest round-trip digits, e.g. `1.2e-6`
    let sci = format!("{:e}", v.abs());
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let sign = if v < 0.0 { "-" } else { "" };

    let body = if !(-4..16).contains(&exp) {
        let (first, rest) = digits.split_at(1);
        let exp_sign = if exp < 0 { '-' } else { '+' };
        if rest.is_empty() {
            format!("{first}e{exp_sign}{:02}", exp.unsigned_abs())
        } else {
            format!("{first}.{rest}e{exp_sign}{:02}", exp.unsigned_abs())
        }
    } else if exp >= 0 {
        let int_len = usize::try_from(exp).unwrap_or(0) + 1;
        if digits.len() <= int_len {
            format!("{digits}{}.0", "0".repeat(int_len - digits.len()))
        } else {
            let (int, frac) = digits.split_at(int_len);
            format!("{int}.{frac}")
        }
    } else {
        let zeros = usize::try_from(-exp - 1).unwrap_or(0);
        format!("0.{}{digits}", "0".repeat(zeros))
    };
    format!("{sign}{body}")
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Session {
    /// Sample rate of the acquisition loop; interval = 1 / frequency.
    pub sampling_frequency_hz: f64,
    /// Length of the offset-averaging window.
    pub calibration_duration_s: f64,
    /// Pre-roll between "start" and the first recorded sample.
    pub countdown_duration_s: f64,
    pub num_channels: u32,
    pub trials_per_condition: u32,
    pub bridge_gain: u32,
    /// Condition label `i` is recorded on channel `i`.
    pub condition_labels: Vec<String>,
    /// Where data and calibration files go. A leading `~` is expanded by the core.
    pub output_directory: String,
    /// Multiplier turning a corrected voltage ratio into newtons.
    pub force_factor_n_per_vv: f64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            sampling_frequency_hz: DEFAULT_SAMPLING_FREQUENCY_HZ,
            calibration_duration_s: 5.0,
            countdown_duration_s: 2.0,
            num_channels: 3,
            trials_per_condition: 5,
            bridge_gain: DEFAULT_BRIDGE_GAIN,
            condition_labels: vec!["A".into(), "B".into(), "C".into()],
            output_directory: ".".into(),
            force_factor_n_per_vv: DEFAULT_FORCE_FACTOR,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Persistence {
    /// Attempts per durable write, including the first one.
    pub max_attempts: u32,
    /// Pause after a locked/denied attempt (ms).
    pub retry_delay_ms: u64,
    /// Upper bound for exponential backoff (ms).
    pub max_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 500,
            max_delay_ms: 4_000,
            backoff: Backoff::Fixed,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct BridgePins {
    pub dt: u8,
    pub sck: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Hardware {
    /// Max time to wait for a conversion before a read counts as failed.
    pub read_timeout_ms: u64,
    /// HX711 wiring, one entry per channel in channel order.
    pub channels: Vec<BridgePins>,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            channels: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Simulation {
    /// Half-width of the uniform noise on synthetic readings.
    pub noise: f64,
    /// Per-channel baselines; channels past the end read 0.5.
    pub bases: Vec<f64>,
    pub seed: Option<u64>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            noise: 0.05,
            bases: vec![0.5, 0.3, 0.7],
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub persistence: Persistence,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub hardware: Hardware,
    #[serde(default)]
    pub simulation: Simulation,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
    load_toml(&text).map_err(|e| eyre::eyre!("invalid configuration in {:?}: {}", path, e))
}

impl Config {
    /// Replace recoverable bad values with safe defaults.
    ///
    /// Returns one message per substitution so the caller can surface them.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut fixed = Vec::new();
        let s = &mut self.session;

        if !(s.sampling_frequency_hz.is_finite() && s.sampling_frequency_hz > 0.0) {
            fixed.push(format!(
                "session.sampling_frequency_hz = {} is invalid; using {}",
                s.sampling_frequency_hz, DEFAULT_SAMPLING_FREQUENCY_HZ
            ));
            s.sampling_frequency_hz = DEFAULT_SAMPLING_FREQUENCY_HZ;
        }
        for (name, value) in [
            ("calibration_duration_s", &mut s.calibration_duration_s),
            ("countdown_duration_s", &mut s.countdown_duration_s),
        ] {
            if !(value.is_finite() && *value >= 0.0) {
                fixed.push(format!("session.{name} = {value} is invalid; using 0"));
                *value = 0.0;
            }
        }
        if s.trials_per_condition == 0 {
            fixed.push("session.trials_per_condition = 0; using 1".to_string());
            s.trials_per_condition = 1;
        }
        if s.bridge_gain == 0 {
            fixed.push(format!(
                "session.bridge_gain = 0; using {DEFAULT_BRIDGE_GAIN}"
            ));
            s.bridge_gain = DEFAULT_BRIDGE_GAIN;
        }
        if !s.force_factor_n_per_vv.is_finite() {
            fixed.push(format!(
                "session.force_factor_n_per_vv is not finite; using {DEFAULT_FORCE_FACTOR}"
            ));
            s.force_factor_n_per_vv = DEFAULT_FORCE_FACTOR;
        }
        if s.output_directory.trim().is_empty() {
            fixed.push("session.output_directory is empty; using \".\"".to_string());
            s.output_directory = ".".into();
        }

        let p = &mut self.persistence;
        if p.max_attempts == 0 {
            fixed.push("persistence.max_attempts = 0; using 1".to_string());
            p.max_attempts = 1;
        }
        if p.max_delay_ms < p.retry_delay_ms {
            fixed.push(format!(
                "persistence.max_delay_ms < retry_delay_ms; using {}",
                p.retry_delay_ms
            ));
            p.max_delay_ms = p.retry_delay_ms;
        }

        fixed
    }

    pub fn validate(&self) -> eyre::Result<()> {
        let s = &self.session;

        // Session
        if !(s.sampling_frequency_hz.is_finite() && s.sampling_frequency_hz > 0.0) {
            eyre::bail!("session.sampling_frequency_hz must be > 0");
        }
        if s.condition_labels.is_empty() {
            eyre::bail!("session.condition_labels must list at least one condition");
        }
        for (i, label) in s.condition_labels.iter().enumerate() {
            if label.trim().is_empty() {
                eyre::bail!("session.condition_labels[{i}] is empty");
            }
            if s.condition_labels[..i].contains(label) {
                eyre::bail!("session.condition_labels has duplicate label {label:?}");
            }
        }
        if s.condition_labels.len() > s.num_channels as usize {
            eyre::bail!(
                "session.condition_labels has {} entries but only {} channels are configured",
                s.condition_labels.len(),
                s.num_channels
            );
        }
        if !SUPPORTED_GAINS.contains(&s.bridge_gain) {
            eyre::bail!(
                "session.bridge_gain must be one of {:?}, got {}",
                SUPPORTED_GAINS,
                s.bridge_gain
            );
        }

        // Persistence
        if self.persistence.max_attempts == 0 {
            eyre::bail!("persistence.max_attempts must be >= 1");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref() {
            if !matches!(rot, "never" | "daily" | "hourly") {
                eyre::bail!("logging.rotation must be one of never|daily|hourly, got {rot:?}");
            }
        }

        // Hardware
        if self.hardware.read_timeout_ms == 0 {
            eyre::bail!("hardware.read_timeout_ms must be >= 1");
        }

        Ok(())
    }
}

/// Offsets CSV schema.
///
/// Expected headers:
/// Channel,Offset (VoltageRatio)
///
/// Example:
/// Channel,Offset (VoltageRatio)
/// 0,0.50012
/// 1,0.29981
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct OffsetRow {
    #[serde(rename = "Channel")]
    pub channel: u32,
    #[serde(rename = "Offset (VoltageRatio)")]
    pub offset: f64,
}

pub const OFFSETS_HEADERS: [&str; 2] = ["Channel", "Offset (VoltageRatio)"];

/// Result of reading an offsets file: the usable rows plus one note per skipped row.
#[derive(Debug, Default)]
pub struct LoadedOffsets {
    pub offsets: BTreeMap<u32, f64>,
    pub skipped: Vec<String>,
}

pub fn load_offsets_csv(path: &Path) -> eyre::Result<LoadedOffsets> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open offsets CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let actual: Vec<String> = headers.iter().map(|s| s.trim().to_string()).collect();
    if actual != OFFSETS_HEADERS {
        eyre::bail!(
            "offsets CSV must have headers 'Channel,Offset (VoltageRatio)', got: {}",
            actual.join(",")
        );
    }

    let mut loaded = LoadedOffsets::default();
    for (idx, rec) in rdr.deserialize::<OffsetRow>().enumerate() {
        match rec {
            Ok(row) if row.offset.is_finite() => {
                loaded.offsets.insert(row.channel, row.offset);
            }
            Ok(row) => loaded
                .skipped
                .push(format!("row {}: offset {} is not finite", idx + 2, row.offset)),
            Err(e) => loaded.skipped.push(format!("row {}: {}", idx + 2, e)),
        }
    }
    Ok(loaded)
}

/// Serialize offsets in channel order, CRLF-terminated like the data log.
pub fn offsets_csv_bytes(offsets: &BTreeMap<u32, f64>) -> eyre::Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    wtr.write_record(OFFSETS_HEADERS)?;
    for (&channel, &offset) in offsets {
        wtr.write_record([channel.to_string(), fmt_float(offset)])?;
    }
    wtr.into_inner()
        .map_err(|e| eyre::eyre!("flush offsets CSV: {}", e.error()))
}
