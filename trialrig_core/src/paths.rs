//! File locations for one participant's session.

use std::fs;
use std::path::{Path, PathBuf};

/// Name of the offsets file shared across sessions ("use previous calibration").
pub const PREVIOUS_CALIBRATION_FILE: &str = "phidget_calibration.csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    dir: PathBuf,
    participant: String,
}

/// Participant ids go into file names; anything but ASCII alphanumerics, `-`
/// and `_` becomes `_`.
pub fn file_safe(participant: &str) -> String {
    let s: String = participant
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if s.is_empty() { "unknown".into() } else { s }
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(dir: &str) -> PathBuf {
    if let Some(rest) = dir.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest.trim_start_matches('/'));
            }
        }
    }
    PathBuf::from(dir)
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(".trialrig_write_test");
    fs::write(&probe, b"ok")?;
    fs::remove_file(&probe)
}

impl SessionPaths {
    /// Paths under `dir` as given, without touching the filesystem.
    pub fn new(dir: impl Into<PathBuf>, participant: &str) -> Self {
        Self {
            dir: dir.into(),
            participant: file_safe(participant),
        }
    }

    /// Create `dir` if needed and check it is writable. Falls back to the current
    /// directory (with a warning) when it is not.
    pub fn prepare(dir: &str, participant: &str) -> Self {
        let wanted = expand_home(dir);
        match probe_writable(&wanted) {
            Ok(()) => Self::new(wanted, participant),
            Err(e) => {
                tracing::warn!(
                    dir = %wanted.display(),
                    error = %e,
                    "output directory is not writable; using current directory"
                );
                Self::new(".", participant)
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Incrementally appended trial log.
    pub fn primary(&self) -> PathBuf {
        self.dir
            .join(format!("viscosity_data_{}.csv", self.participant))
    }

    /// Full-history export; `stamp` is `YYYYmmdd_HHMMSS`.
    pub fn backup(&self, stamp: &str) -> PathBuf {
        self.dir
            .join(format!("viscosity_data_{}_{stamp}_backup.csv", self.participant))
    }

    /// Export target used when `backup(stamp)` stays locked.
    pub fn backup_alt(&self, stamp: &str) -> PathBuf {
        self.dir
            .join(format!("viscosity_data_{}_{stamp}_backup2.csv", self.participant))
    }

    pub fn calibration(&self) -> PathBuf {
        self.dir
            .join(format!("phidget_calibration_{}.csv", self.participant))
    }

    pub fn previous_calibration(&self) -> PathBuf {
        self.dir.join(PREVIOUS_CALIBRATION_FILE)
    }
}

/// Local time formatted for export file names.
pub fn export_stamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_participant() {
        let p = SessionPaths::new("/data", "P 07/x");
        assert_eq!(p.primary(), Path::new("/data/viscosity_data_P_07_x.csv"));
        assert_eq!(
            p.backup("20250101_120000"),
            Path::new("/data/viscosity_data_P_07_x_20250101_120000_backup.csv")
        );
        assert_eq!(
            p.calibration(),
            Path::new("/data/phidget_calibration_P_07_x.csv")
        );
        assert_eq!(
            p.previous_calibration(),
            Path::new("/data/phidget_calibration.csv")
        );
    }

    #[test]
    fn prepare_creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/out");
        let p = SessionPaths::prepare(dir.to_str().unwrap(), "1");
        assert_eq!(p.dir(), dir.as_path());
        assert!(dir.is_dir());
    }

    #[test]
    fn stamp_has_expected_shape() {
        let s = export_stamp();
        assert_eq!(s.len(), 15);
        assert_eq!(&s[8..9], "_");
    }
}
