use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use fs2::FileExt;

/// Exclusive writer lock on the history ledger, backed by a lock file.
/// Released when dropped. Readers never take it.
pub struct WriterLock {
    _file: File,
}

impl WriterLock {
    /// Block until the lock at `path` is held.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_lock_blocks_second_writer() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history.csv.lock");

        let lock = WriterLock::acquire(&path).unwrap();
        let other = File::open(&path).unwrap();
        assert!(other.try_lock_exclusive().is_err());
        drop(lock);
        other.try_lock_exclusive().unwrap();
    }
}
