//! Per-channel baseline offsets.
//!
//! A `CalibrationOffsets` value is an immutable snapshot. `OffsetStore` holds the
//! active one and swaps it wholesale; readers keep whatever snapshot they took.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use trialrig_traits::ChannelId;

use crate::error::{Result, RigError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationOffsets {
    offsets: BTreeMap<ChannelId, f64>,
}

impl CalibrationOffsets {
    pub fn new(offsets: BTreeMap<ChannelId, f64>) -> Self {
        Self { offsets }
    }

    pub fn get(&self, channel: ChannelId) -> Option<f64> {
        self.offsets.get(&channel).copied()
    }

    /// Offset for `channel`, 0.0 when the channel has no entry.
    pub fn offset(&self, channel: ChannelId) -> f64 {
        self.get(channel).unwrap_or(0.0)
    }

    /// `raw - offset(channel)`.
    #[inline]
    pub fn correct(&self, channel: ChannelId, raw: f64) -> f64 {
        raw - self.offset(channel)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<ChannelId, f64> {
        &self.offsets
    }

    /// Load offsets saved by a previous session. Malformed rows are skipped and
    /// logged.
    pub fn load_csv(path: &Path) -> Result<Self> {
        let loaded = trialrig_config::load_offsets_csv(path)
            .map_err(|e| eyre::Report::new(RigError::Calibration(e.to_string())))?;
        for note in &loaded.skipped {
            tracing::warn!(path = %path.display(), "skipped calibration row: {note}");
        }
        Ok(Self::new(loaded.offsets))
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        trialrig_config::offsets_csv_bytes(&self.offsets)
            .map_err(|e| eyre::Report::new(RigError::Storage(e.to_string())))
    }
}

impl FromIterator<(ChannelId, f64)> for CalibrationOffsets {
    fn from_iter<I: IntoIterator<Item = (ChannelId, f64)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Shared handle to the active offsets.
#[derive(Debug, Clone, Default)]
pub struct OffsetStore {
    active: Arc<RwLock<Arc<CalibrationOffsets>>>,
}

impl OffsetStore {
    pub fn new(initial: CalibrationOffsets) -> Self {
        Self {
            active: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    pub fn snapshot(&self) -> Arc<CalibrationOffsets> {
        let guard = self.active.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Install `next`, returning the snapshot it replaced. Nothing is merged.
    pub fn replace(&self, next: CalibrationOffsets) -> Arc<CalibrationOffsets> {
        let mut guard = self.active.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_channel_corrects_by_zero() {
        let offsets: CalibrationOffsets = [(0, 0.25)].into_iter().collect();
        assert_eq!(offsets.correct(0, 1.0), 0.75);
        assert_eq!(offsets.correct(4, 1.0), 1.0);
    }

    #[test]
    fn replace_discards_old_snapshot_without_merging() {
        let store = OffsetStore::new([(0, 0.1), (1, 0.2)].into_iter().collect());
        let before = store.snapshot();
        let old = store.replace([(2, 0.3)].into_iter().collect());
        assert_eq!(old, before);
        let now = store.snapshot();
        assert_eq!(now.get(0), None);
        assert_eq!(now.get(2), Some(0.3));
        // a reader holding the old snapshot is unaffected
        assert_eq!(before.get(1), Some(0.2));
    }
}
