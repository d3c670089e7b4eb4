//! Advisory cross-process file locks.
//!
//! Several independent processes may run against the same shared directory,
//! so an in-memory mutex is not enough here. The locks are based on `flock`
//! (or `LockFileEx` on Windows), which also excludes handles opened by
//! different tasks of the same process.
use crate::prelude::*;
use crate::util::jitter;
use crate::util::tokio::spawn_blocking;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Interval between the lock attempts during a single acquisition round
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct InterProcessLock {
    path: PathBuf,
}

/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct InterProcessLockGuard {
    file: fs_err::File,
}

impl InterProcessLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Makes a single non-blocking attempt to take the lock.
    pub fn try_acquire(&self) -> io::Result<Option<InterProcessLockGuard>> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let file = fs_err::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.path)?;

        match fs2::FileExt::try_lock_exclusive(file.file()) {
            Ok(()) => Ok(Some(InterProcessLockGuard { file })),
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Polls the lock until it is acquired or the `timeout` elapses. The
    /// attempts run on the blocking pool, they touch the file system.
    pub async fn acquire_within(
        &self,
        timeout: Duration,
    ) -> io::Result<Option<InterProcessLockGuard>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let lock = self.clone();
            if let Some(guard) = spawn_blocking(move || lock.try_acquire()).await? {
                return Ok(Some(guard));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits for the lock indefinitely. Each acquisition round lasts 5-10
    /// seconds, and the rounds are separated by a 30-150 seconds random gap.
    pub async fn acquire(&self) -> io::Result<InterProcessLockGuard> {
        loop {
            let timeout = jitter::uniform_secs(5.0, 10.0);
            if let Some(guard) = self.acquire_within(timeout).await? {
                debug!(path = %self.path.display(), "Acquired the lock");
                return Ok(guard);
            }

            let gap = jitter::uniform_secs(30.0, 150.0);
            warn!(
                path = %self.path.display(),
                retry_in = tracing_duration(gap),
                "The lock is busy, will retry later"
            );
            tokio::time::sleep(gap).await;
        }
    }
}

impl Drop for InterProcessLockGuard {
    fn drop(&mut self) {
        // Closing the file releases the lock too
        if let Err(err) = fs2::FileExt::unlock(self.file.file()) {
            warn!(
                path = %self.file.path().display(),
                err = %err,
                "Failed to unlock the file"
            );
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_handle_is_excluded_while_the_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock = InterProcessLock::new(dir.path().join("lock_files/account.lock"));

        let guard = lock.try_acquire().unwrap().expect("the lock must be free");
        assert!(lock.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn acquisition_round_gives_up_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let lock = InterProcessLock::new(dir.path().join("busy.lock"));

        let _guard = lock.try_acquire().unwrap().unwrap();

        let start = tokio::time::Instant::now();
        let attempt = lock.acquire_within(Duration::from_secs(5)).await.unwrap();

        assert!(attempt.is_none());
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[test_log::test(tokio::test)]
    async fn released_lock_is_taken_by_the_next_round() {
        let dir = tempfile::tempdir().unwrap();
        let lock = InterProcessLock::new(dir.path().join("lock_files/account.lock"));

        let guard = lock.acquire_within(Duration::from_secs(1)).await.unwrap();
        assert!(guard.is_some());
        assert!(lock.try_acquire().unwrap().is_none());

        drop(guard);

        let guard = lock.acquire_within(Duration::from_secs(1)).await.unwrap();
        assert!(guard.is_some());
    }
}
