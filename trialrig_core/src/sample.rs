//! In-memory sample storage shared by the sampler, the persistence worker and
//! export.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use trialrig_traits::ChannelId;

/// One reading taken during a trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Global 1-based trial index.
    pub trial: u32,
    pub condition: String,
    pub channel: ChannelId,
    pub gain: u32,
    /// Seconds since the trial started recording, paused time excluded.
    pub timestamp: f64,
    pub raw: f64,
    /// `raw - offset(channel)`.
    pub corrected: f64,
}

/// Append-only per-channel log of every sample in the session.
///
/// The sampler is the only appender; everyone else reads. A trial's rows never
/// change once that trial has stopped.
#[derive(Debug, Clone, Default)]
pub struct SampleLog {
    channels: Arc<RwLock<BTreeMap<ChannelId, Vec<Sample>>>>,
}

impl SampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, sample: Sample) {
        let mut map = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(sample.channel).or_default().push(sample);
    }

    /// Rows of `trial`, ordered by channel then by collection order.
    pub fn trial_rows(&self, trial: u32) -> Vec<Sample> {
        let map = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        map.values()
            .flat_map(|rows| rows.iter().filter(|s| s.trial == trial))
            .cloned()
            .collect()
    }

    /// Every row, ordered by channel then by collection order.
    pub fn snapshot(&self) -> Vec<Sample> {
        let map = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        map.values().flat_map(|rows| rows.iter().cloned()).collect()
    }

    pub fn channel_len(&self, channel: ChannelId) -> usize {
        let map = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&channel).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        let map = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        map.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Samples of the trial currently being recorded, for live display.
#[derive(Debug, Clone, Default)]
pub struct TrialBuffer {
    rows: Arc<Mutex<Vec<Sample>>>,
}

impl TrialBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, sample: Sample) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }

    pub fn clear(&self) {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last(&self) -> Option<Sample> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(trial: u32, channel: ChannelId, raw: f64) -> Sample {
        Sample {
            trial,
            condition: "A".into(),
            channel,
            gain: 128,
            timestamp: 0.0,
            raw,
            corrected: raw,
        }
    }

    #[test]
    fn trial_rows_are_channel_then_insertion_ordered() {
        let log = SampleLog::new();
        log.append(s(1, 2, 0.1));
        log.append(s(1, 0, 0.2));
        log.append(s(2, 0, 0.3));
        log.append(s(1, 0, 0.4));
        log.append(s(1, 2, 0.5));

        let raws: Vec<f64> = log.trial_rows(1).iter().map(|r| r.raw).collect();
        assert_eq!(raws, [0.2, 0.4, 0.1, 0.5]);
        assert_eq!(log.trial_rows(2).len(), 1);
        assert_eq!(log.len(), 5);
        assert_eq!(log.channel_len(2), 2);
    }
}
