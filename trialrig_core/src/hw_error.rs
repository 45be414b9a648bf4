//! Maps `Box<dyn Error>` from the channel capability to typed `RigError`.
//!
//! `trialrig_traits::ChannelReader` returns `Box<dyn Error + Send + Sync>`; this
//! module converts those to our taxonomy, with an optional feature-gated path
//! for `trialrig_hardware::HwError` downcasting.

use crate::error::RigError;

/// Map a capability-boundary error to a typed `RigError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> RigError {
    #[cfg(feature = "hardware-errors")]
    {
        use trialrig_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::DataReadyTimeout => RigError::Timeout,
                other => RigError::Hardware(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        RigError::Timeout
    } else {
        RigError::Hardware(s)
    }
}
