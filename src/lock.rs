// swarm-autoscaler: Process singleton lock
//
// An advisory exclusive lock on a well-known path. A process that cannot
// take it must not run the decision loop, but remains a valid peer for
// metric queries.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::{AutoscalerError, Result};

/// Held for the process lifetime; the lock is released on drop (and by the
/// OS on process exit).
pub struct SingletonLock {
    file: File,
}

impl SingletonLock {
    /// `Ok(None)` means another process already holds the lock. An
    /// unopenable lock path is an initialization failure.
    pub fn acquire(path: &Path) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| {
                AutoscalerError::Lock(format!("cannot open lock file {}: {err}", path.display()))
            })?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for SingletonLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_first_is_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("autoscaler.lock");

        let first = SingletonLock::acquire(&path).expect("acquire");
        assert!(first.is_some());
        assert!(SingletonLock::acquire(&path).expect("acquire").is_none());

        drop(first);
        assert!(SingletonLock::acquire(&path).expect("acquire").is_some());
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let result = SingletonLock::acquire(Path::new("/nonexistent-dir/autoscaler.lock"));
        assert!(matches!(result, Err(AutoscalerError::Lock(_))));
    }
}
