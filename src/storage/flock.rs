//! Advisory file lock guarding the snapshot file and store leases

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Exclusive advisory lock on a file, released on drop.
///
/// Acquisition blocks until any other holder releases the lock, so
/// independent processes sharing a snapshot file take turns.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn acquire<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        Self::lock_exclusive(&file)?;

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn lock_exclusive(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX};

        let fd = file.as_raw_fd();
        loop {
            let result = unsafe { flock(fd, LOCK_EX) };
            if result == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    #[cfg(not(unix))]
    fn lock_exclusive(_file: &File) -> io::Result<()> {
        // No advisory locking on this platform; callers are serialised only
        // within one process.
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the flock. The lock file itself is
        // left in place so that waiters keep locking the same inode.
        tracing::trace!(path = %self.path.display(), "Releasing store lock");
    }
}
