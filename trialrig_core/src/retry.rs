//! Bounded retry for durable writes.
//!
//! A target that is locked by another process, or a write refused with
//! permission-denied, is retried after a delay. Any other I/O error fails at once.

use std::io;
use std::path::Path;
use std::time::Duration;

use trialrig_traits::{Clock, Storage};

use crate::error::{Result, RigError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    #[default]
    Fixed,
    /// Doubles after every failed attempt, capped at `RetryPolicy::max_delay`.
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first; at least 1 is always made.
    pub max_attempts: u32,
    pub delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no waiting.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `failed`-th failed attempt (1-based).
    pub fn delay_for(&self, failed: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let shift = failed.saturating_sub(1).min(31);
                self.delay
                    .saturating_mul(1u32 << shift)
                    .min(self.max_delay.max(self.delay))
            }
        }
    }
}

/// Run `op` against `path` until it succeeds or the policy is exhausted.
///
/// Returns the number of attempts used. Exhaustion yields
/// `RigError::StorageLocked`; a non-retryable failure yields `RigError::Storage`.
pub fn write_with_retry<F>(
    storage: &dyn Storage,
    clock: &dyn Clock,
    policy: &RetryPolicy,
    path: &Path,
    mut op: F,
) -> Result<u32>
where
    F: FnMut(&dyn Storage, &Path) -> io::Result<()>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        if storage.is_locked(path) {
            tracing::warn!(
                path = %path.display(),
                attempt,
                attempts,
                "file is locked by another program"
            );
        } else {
            match op(storage, path) {
                Ok(()) => return Ok(attempt),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    tracing::warn!(
                        path = %path.display(),
                        attempt,
                        attempts,
                        error = %e,
                        "write refused"
                    );
                }
                Err(e) => {
                    return Err(eyre::Report::new(RigError::Storage(format!(
                        "{}: {e}",
                        path.display()
                    ))));
                }
            }
        }
        if attempt < attempts {
            clock.sleep(policy.delay_for(attempt));
        }
    }
    Err(eyre::Report::new(RigError::StorageLocked(
        path.display().to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MemStorage;
    use trialrig_traits::clock::test_clock::TestClock;

    #[test]
    fn exponential_delay_is_capped() {
        let p = RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff: Backoff::Exponential,
        };
        let got: Vec<u128> = (1..=4).map(|n| p.delay_for(n).as_millis()).collect();
        assert_eq!(got, [100, 200, 350, 350]);
    }

    #[test]
    fn locked_target_is_retried_then_written() {
        let storage = MemStorage::new();
        storage.lock_next(2);
        let clock = TestClock::new();
        let path = Path::new("out.csv");
        let used = write_with_retry(&storage, &clock, &RetryPolicy::default(), path, |s, p| {
            s.append(p, b"x")
        })
        .unwrap();
        assert_eq!(used, 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500); 2]);
        assert_eq!(storage.text(path).as_deref(), Some("x"));
    }

    #[test]
    fn exhaustion_is_storage_locked() {
        let storage = MemStorage::new();
        storage.lock_next(3);
        let clock = TestClock::new();
        let err = write_with_retry(
            &storage,
            &clock,
            &RetryPolicy::default(),
            Path::new("out.csv"),
            |s, p| s.append(p, b"x"),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RigError>(),
            Some(RigError::StorageLocked(_))
        ));
        assert_eq!(storage.lock_checks(), 3);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn other_io_errors_are_not_retried() {
        let storage = MemStorage::new();
        let clock = TestClock::new();
        let mut calls = 0;
        let err = write_with_retry(
            &storage,
            &clock,
            &RetryPolicy::default(),
            Path::new("out.csv"),
            |_, _| {
                calls += 1;
                Err(io::Error::other("disk full"))
            },
        )
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(
            err.downcast_ref::<RigError>(),
            Some(RigError::Storage(_))
        ));
        assert!(clock.sleeps().is_empty());
    }
}
