//! Directory-wide advisory lock for the flat-file store.
//!
//! The lock is a file created with `create_new` (atomic on every
//! platform we care about) holding the owner's PID as plain text. It is
//! cooperative: only writers that honor it are excluded. One lock gates
//! writes to every entity file in the data directory.
//!
//! Contention is handled by probing the recorded PID for liveness —
//! a dead owner means a stale lock, which is deleted and re-raced —
//! otherwise by exponential backoff with jitter until the configured
//! timeout, after which acquisition fails with a contention error.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::error::{Error, Result};

/// Lock file name inside the data directory.
pub const LOCK_FILENAME: &str = "store.lock";

/// Held advisory lock. Released (file removed) on drop.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    /// Acquire the lock for a data directory, blocking up to
    /// `config.timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockContention`] if the timeout elapses while a
    /// live process holds the lock, or an I/O error for anything else.
    pub fn acquire(data_dir: &Path, config: &LockConfig) -> Result<Self> {
        let path = data_dir.join(LOCK_FILENAME);
        fs::create_dir_all(data_dir)?;

        let started = Instant::now();
        let mut delay = config.initial_delay;
        let mut holder = None;

        loop {
            match Self::try_create(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "acquired store lock");
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    holder = read_owner(&path);
                    if let Some(pid) = holder {
                        if !process_alive(pid) {
                            warn!(pid, path = %path.display(), "removing stale store lock");
                            remove_stale(&path);
                            continue;
                        }
                    } else {
                        // Unreadable or empty lock file: treat as stale.
                        remove_stale(&path);
                        continue;
                    }
                }
                Err(err) => return Err(err.into()),
            }

            if started.elapsed() >= config.timeout {
                return Err(Error::LockContention {
                    path,
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    holder,
                });
            }

            std::thread::sleep(with_jitter(delay));
            delay = next_delay(delay, config);
        }
    }

    /// Try once to create the lock file, without waiting.
    fn try_create(path: &Path) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;
        Ok(())
    }

    /// Path of the underlying lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            // Releasing a lock that is already gone is not worth failing over.
            debug!(path = %self.path.display(), "lock release failed: {err}");
        }
    }
}

/// Read the PID recorded in an existing lock file.
fn read_owner(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn remove_stale(path: &Path) {
    // Losing the removal race to another waiter is fine; both will retry
    // the atomic create.
    let _ = fs::remove_file(path);
}

/// Whether the given PID denotes a live process.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(raw) => kill(Pid::from_raw(raw), None).is_ok(),
        Err(_) => false,
    }
}

/// Without a liveness probe the holder must be assumed alive; contention
/// then only resolves via timeout.
#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn next_delay(current: Duration, config: &LockConfig) -> Duration {
    let scaled = current.mul_f64(config.backoff_factor);
    scaled.min(config.max_delay)
}

/// Add up to 50% jitter so concurrent waiters do not retry in lockstep.
fn with_jitter(delay: Duration) -> Duration {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let span = (delay.as_millis() / 2).max(1);
    let jitter_ms = u128::from(nanos) % span;
    delay + Duration::from_millis(u64::try_from(jitter_ms).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quick_config() -> LockConfig {
        LockConfig {
            timeout: Duration::from_millis(200),
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn test_acquire_writes_pid() {
        let dir = TempDir::new().unwrap();
        let lock = DirLock::acquire(dir.path(), &quick_config()).unwrap();

        let contents = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_release_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = {
            let lock = DirLock::acquire(dir.path(), &quick_config()).unwrap();
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_contention_times_out_against_live_holder() {
        let dir = TempDir::new().unwrap();
        let _held = DirLock::acquire(dir.path(), &quick_config()).unwrap();

        // Same-process PID is alive, so the second acquire must wait out
        // the timeout and fail.
        let err = DirLock::acquire(dir.path(), &quick_config()).unwrap_err();
        assert!(err.is_contention());
    }

    #[test]
    fn test_stale_lock_is_recovered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILENAME);

        // PID u32::MAX - 1 cannot denote a live process on any sane host.
        fs::write(&path, format!("{}", u32::MAX - 1)).unwrap();

        let lock = DirLock::acquire(dir.path(), &quick_config()).unwrap();
        let contents = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_garbage_lock_file_treated_as_stale() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LOCK_FILENAME), "not a pid").unwrap();

        assert!(DirLock::acquire(dir.path(), &quick_config()).is_ok());
    }

    #[test]
    fn test_reacquire_after_release() {
        let dir = TempDir::new().unwrap();
        drop(DirLock::acquire(dir.path(), &quick_config()).unwrap());
        assert!(DirLock::acquire(dir.path(), &quick_config()).is_ok());
    }
}
