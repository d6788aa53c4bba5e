//! Single-instance guard: `<cache_dir>/pvetui.lock` created with
//! `O_CREAT|O_EXCL`. A pre-existing file is only a conflict if the PID
//! it names is still alive (checked with a signal-0 `kill(2)` probe on
//! unix), so a crash doesn't permanently lock out future launches.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::PveError;

const LOCK_FILE_NAME: &str = "pvetui.lock";

pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Acquires the lock in `dir`, creating `dir` if needed. Fails with
    /// `PveError::Busy` if another live process holds it.
    pub fn acquire(dir: &Path) -> Result<Self, PveError> {
        fs::create_dir_all(dir)
            .map_err(|e| PveError::Internal(format!("cannot create lock directory: {e}")))?;
        let path = dir.join(LOCK_FILE_NAME);

        match create_exclusive(&path) {
            Ok(()) => Ok(Self { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if let Some(pid) = read_pid(&path)
                    && process_is_alive(pid)
                {
                    return Err(PveError::Busy(format!(
                        "another pvetui instance is already running (pid {pid})"
                    )));
                }
                // Stale lock: owning process is gone. Replace it.
                fs::remove_file(&path)
                    .map_err(|e| PveError::Internal(format!("cannot remove stale lock: {e}")))?;
                create_exclusive(&path)
                    .map_err(|e| PveError::Internal(format!("cannot recreate lock: {e}")))?;
                Ok(Self { path })
            }
            Err(e) => Err(PveError::Internal(format!("cannot create lock file: {e}"))),
        }
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn create_exclusive(path: &Path) -> io::Result<()> {
    use std::io::Write;
    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    write!(file, "{}", std::process::id())
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// `kill(pid, 0)` sends no signal; it only reports whether `pid` could
/// be signalled. `ESRCH` means the process is gone, anything else
/// (including success or `EPERM`) means it is still alive.
#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    ret == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    // No portable liveness check off Linux; assume alive and let the
    // exclusive-create path be the only guard.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn first_acquire_succeeds_and_writes_current_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PidLock::acquire(dir.path()).unwrap();
        let contents = fs::read_to_string(dir.path().join(LOCK_FILE_NAME)).unwrap();
        assert_eq!(contents, std::process::id().to_string());
        drop(lock);
    }

    #[test]
    #[serial]
    fn second_acquire_while_first_alive_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let _first = PidLock::acquire(dir.path()).unwrap();
        let second = PidLock::acquire(dir.path());
        assert!(matches!(second, Err(PveError::Busy(_))));
    }

    #[test]
    #[serial]
    fn stale_lock_from_dead_pid_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        // A PID essentially guaranteed not to be a live process.
        fs::write(&path, "999999999").unwrap();
        let lock = PidLock::acquire(dir.path());
        assert!(lock.is_ok());
    }

    #[test]
    #[serial]
    fn releasing_the_lock_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PidLock::acquire(dir.path()).unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        drop(lock);
        assert!(!path.exists());
    }
}
