use std::io;
use std::path::Path;

/// Durable write primitives with lock detection.
///
/// Methods take `&self`: implementations are shared between the persistence
/// worker and the manual export path and must synchronize internally.
pub trait Storage: Send + Sync {
    /// True when `path` exists and another process currently prevents writing to it.
    /// A missing file is never locked.
    fn is_locked(&self, path: &Path) -> bool;

    /// Create `path` (or replace its contents) with exactly `bytes`.
    fn create(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Append `bytes` to `path`, creating it when missing.
    fn append(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    fn is_locked(&self, path: &Path) -> bool {
        (**self).is_locked(path)
    }

    fn create(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        (**self).create(path, bytes)
    }

    fn append(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        (**self).append(path, bytes)
    }
}
