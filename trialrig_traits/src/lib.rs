//! Capabilities the trial engine is written against.
//!
//! The core never touches a sensor driver or the filesystem directly: it reads
//! channels through [`ChannelReader`], keeps time through [`Clock`], and writes
//! the durable log through [`Storage`].
pub mod clock;
pub mod storage;

pub use clock::{Clock, MonotonicClock};
pub use storage::Storage;

/// Logical input channel index (0-based, as exposed by the bridge).
pub type ChannelId = u32;

/// Error type crossing the capability boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// "Read a value from channel N now."
///
/// Implementations may fail transiently (device busy, channel detached); callers
/// treat a failed read as a skipped sample, not as a fatal condition.
pub trait ChannelReader {
    /// Channel ids this source can currently serve, ascending.
    fn channels(&self) -> Vec<ChannelId>;

    /// Read the current raw value (a voltage ratio) of `channel`.
    fn read(&mut self, channel: ChannelId) -> Result<f64, BoxError>;

    /// Amplifier gain in effect for `channel`, if the source knows it.
    fn gain(&self, _channel: ChannelId) -> Option<u32> {
        None
    }
}

impl<R: ChannelReader + ?Sized> ChannelReader for Box<R> {
    fn channels(&self) -> Vec<ChannelId> {
        (**self).channels()
    }

    fn read(&mut self, channel: ChannelId) -> Result<f64, BoxError> {
        (**self).read(channel)
    }

    fn gain(&self, channel: ChannelId) -> Option<u32> {
        (**self).gain(channel)
    }
}
