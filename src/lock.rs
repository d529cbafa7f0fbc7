//! Cross-process single-flight locks.
//!
//! A [`GenerationLock`] is an advisory exclusive lock on `<target>.lock`,
//! visible to every process sharing the cache directory. It is held for one
//! generation attempt and released on drop, including on early returns and
//! panics. Lock files are left in place; removing a file another process is
//! blocked on would let a third process lock a fresh inode.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::fcntl::{Flock, FlockArg};

/// Lock file path for a target artifact (file or directory).
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Exclusive advisory lock keyed by a target artifact path.
pub struct GenerationLock {
    path: PathBuf,
    #[cfg(unix)]
    _guard: Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl GenerationLock {
    /// Block until the lock for `target` is held.
    pub fn acquire(target: &Path) -> io::Result<Self> {
        let path = lock_path_for(target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Some(lock) = Self::try_lock(&path)? {
            return Ok(lock);
        }

        tracing::debug!(lock = %path.display(), "waiting for concurrent generation");
        let started = Instant::now();
        let lock = Self::lock_blocking(&path)?;
        tracing::debug!(
            lock = %path.display(),
            waited_ms = started.elapsed().as_millis() as u64,
            "generation lock acquired after contention"
        );
        Ok(lock)
    }

    /// Take the lock for `target` only if it is free.
    #[cfg(test)]
    fn try_acquire(target: &Path) -> io::Result<Option<Self>> {
        let path = lock_path_for(target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::try_lock(&path)
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn open(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    #[cfg(unix)]
    fn try_lock(path: &Path) -> io::Result<Option<Self>> {
        match Flock::lock(Self::open(path)?, FlockArg::LockExclusiveNonblock) {
            Ok(guard) => Ok(Some(Self {
                path: path.to_path_buf(),
                _guard: guard,
            })),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_, errno)) => Err(io::Error::from(errno)),
        }
    }

    #[cfg(unix)]
    fn lock_blocking(path: &Path) -> io::Result<Self> {
        loop {
            match Flock::lock(Self::open(path)?, FlockArg::LockExclusive) {
                Ok(guard) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                        _guard: guard,
                    })
                }
                Err((_, Errno::EINTR)) => continue,
                Err((_, errno)) => return Err(io::Error::from(errno)),
            }
        }
    }

    // Without flock, fall back to exclusive creation of the lock file.
    #[cfg(not(unix))]
    fn try_lock(path: &Path) -> io::Result<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => Ok(Some(Self {
                path: path.to_path_buf(),
                _file: file,
            })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[cfg(not(unix))]
    fn lock_blocking(path: &Path) -> io::Result<Self> {
        loop {
            if let Some(lock) = Self::try_lock(path)? {
                return Ok(lock);
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
    }
}

#[cfg(not(unix))]
impl Drop for GenerationLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl std::fmt::Debug for GenerationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationLock")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_lock_path_for() {
        assert_eq!(
            lock_path_for(Path::new("/cache/abc.mp4")),
            PathBuf::from("/cache/abc.mp4.lock")
        );
        assert_eq!(
            lock_path_for(Path::new("/hls/key")),
            PathBuf::from("/hls/key.lock")
        );
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("thumb.jpg");

        let held = GenerationLock::acquire(&target).unwrap();
        assert!(held.path().exists());
        assert!(GenerationLock::try_acquire(&target).unwrap().is_none());

        drop(held);
        assert!(GenerationLock::try_acquire(&target).unwrap().is_some());
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("proxy.mp4");
        let released = Arc::new(AtomicBool::new(false));

        let held = GenerationLock::acquire(&target).unwrap();
        let waiter = {
            let target = target.clone();
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let _lock = GenerationLock::acquire(&target).unwrap();
                released.load(Ordering::SeqCst)
            })
        };

        thread::sleep(Duration::from_millis(100));
        released.store(true, Ordering::SeqCst);
        drop(held);

        assert!(waiter.join().unwrap(), "waiter got the lock before release");
    }

    #[test]
    fn test_different_targets_do_not_contend() {
        let dir = tempdir().unwrap();
        let _a = GenerationLock::acquire(&dir.path().join("a.jpg")).unwrap();
        assert!(GenerationLock::try_acquire(&dir.path().join("b.jpg"))
            .unwrap()
            .is_some());
    }
}
