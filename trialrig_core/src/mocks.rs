//! Test and helper mocks for trialrig_core

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use trialrig_traits::{BoxError, ChannelId, ChannelReader, Storage};

/// Every channel reads the same value.
#[derive(Debug, Clone)]
pub struct ConstReader {
    value: f64,
    channels: Vec<ChannelId>,
    gain: Option<u32>,
}

impl ConstReader {
    pub fn new(value: f64, num_channels: u32) -> Self {
        Self {
            value,
            channels: (0..num_channels).collect(),
            gain: None,
        }
    }

    pub fn with_gain(mut self, gain: u32) -> Self {
        self.gain = Some(gain);
        self
    }
}

impl ChannelReader for ConstReader {
    fn channels(&self) -> Vec<ChannelId> {
        self.channels.clone()
    }

    fn read(&mut self, channel: ChannelId) -> Result<f64, BoxError> {
        if self.channels.contains(&channel) {
            Ok(self.value)
        } else {
            Err(Box::new(io::Error::other(format!("channel {channel} unavailable"))))
        }
    }

    fn gain(&self, _channel: ChannelId) -> Option<u32> {
        self.gain
    }
}

/// A reader whose every read fails.
#[derive(Debug, Clone, Default)]
pub struct FailingReader {
    channels: Vec<ChannelId>,
}

impl FailingReader {
    pub fn new(num_channels: u32) -> Self {
        Self {
            channels: (0..num_channels).collect(),
        }
    }
}

impl ChannelReader for FailingReader {
    fn channels(&self) -> Vec<ChannelId> {
        self.channels.clone()
    }

    fn read(&mut self, _channel: ChannelId) -> Result<f64, BoxError> {
        Err(Box::new(io::Error::other("device busy")))
    }
}

/// Per-channel queue of scripted results; `None` entries fail. An exhausted
/// channel fails, or reads `fallback` when one is set.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReader {
    script: BTreeMap<ChannelId, VecDeque<Option<f64>>>,
    fallback: Option<f64>,
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(mut self, channel: ChannelId, values: impl IntoIterator<Item = Option<f64>>) -> Self {
        self.script.entry(channel).or_default().extend(values);
        self
    }

    pub fn with_fallback(mut self, value: f64) -> Self {
        self.fallback = Some(value);
        self
    }
}

impl ChannelReader for ScriptedReader {
    fn channels(&self) -> Vec<ChannelId> {
        self.script.keys().copied().collect()
    }

    fn read(&mut self, channel: ChannelId) -> Result<f64, BoxError> {
        let next = self
            .script
            .get_mut(&channel)
            .and_then(VecDeque::pop_front);
        match (next, self.fallback) {
            (Some(Some(v)), _) => Ok(v),
            (Some(None), _) => Err(Box::new(io::Error::other("scripted failure"))),
            (None, Some(v)) => Ok(v),
            (None, None) => Err(Box::new(io::Error::other("script exhausted"))),
        }
    }
}

/// In-memory `Storage` with injectable lock and permission failures.
#[derive(Debug, Default)]
pub struct MemStorage {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    locked_next: AtomicU32,
    denied_next: AtomicU32,
    lock_checks: AtomicU32,
    creates: AtomicU32,
    appends: AtomicU32,
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` lock probes report "locked".
    pub fn lock_next(&self, n: u32) {
        self.locked_next.store(n, Ordering::Release);
    }

    /// The next `n` writes fail with permission-denied.
    pub fn deny_next(&self, n: u32) {
        self.denied_next.store(n, Ordering::Release);
    }

    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn text(&self, path: &Path) -> Option<String> {
        self.contents(path)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn lock_checks(&self) -> u32 {
        self.lock_checks.load(Ordering::Acquire)
    }

    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::Acquire)
    }

    pub fn appends(&self) -> u32 {
        self.appends.load(Ordering::Acquire)
    }

    fn denied(&self) -> io::Result<()> {
        if take_one(&self.denied_next) {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "access denied"))
        } else {
            Ok(())
        }
    }
}

impl Storage for MemStorage {
    fn is_locked(&self, _path: &Path) -> bool {
        self.lock_checks.fetch_add(1, Ordering::AcqRel);
        take_one(&self.locked_next)
    }

    fn create(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.denied()?;
        self.creates.fetch_add(1, Ordering::AcqRel);
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn append(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.denied()?;
        self.appends.fetch_add(1, Ordering::AcqRel);
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }
}
