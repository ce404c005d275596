//! Per-profile process locking and graceful-interrupt supervision.
//!
//! Grounded in `faub.cc`'s PID-file locking (acquire: write our pid to
//! `<profile>.lock` with `O_EXCL`, or read the existing pid and check
//! `kill(pid, 0)` to tell a stale lock from a live holder) and its signal
//! handler, which sets a flag read by the main loop rather than doing
//! cleanup work inside the handler itself. Locking is opt-in per profile
//! config, not automatic, matching the original's CLI flag gating it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::error::{FaubError, Result};

/// A lock held by a live pid younger than this is never reclaimed without
/// `--force`; one older than this is considered abandoned and reclaimed
/// after sending it `SIGTERM`, matching the original's 24-hour stale-lock
/// cutoff for a process that's alive but has plainly wedged.
const STALE_LOCK_AGE_SECS: u64 = 24 * 3600;

/// A held profile lock; releases on drop.
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Try to acquire the lock file at `path` without forcing reclaim of a
    /// live holder. Equivalent to `acquire_with_force(path, false)`.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        Self::acquire_with_force(path, false)
    }

    /// Try to acquire the lock file at `path`.
    ///
    /// If a lock file already exists and its pid is dead, the lock is
    /// silently reclaimed. If the pid is alive:
    /// - `force == true`: the holder is killed and the lock is reclaimed
    ///   unconditionally (the `--force` CLI path).
    /// - the lock's age is under [`STALE_LOCK_AGE_SECS`]: refused with
    ///   [`FaubError::LockContention`].
    /// - the lock is older than that: treated as abandoned — the holder is
    ///   sent `SIGTERM` and the lock is reclaimed.
    pub fn acquire_with_force(path: impl Into<PathBuf>, force: bool) -> Result<Self> {
        let path = path.into();
        match fs::read_to_string(&path) {
            Ok(contents) => {
                if let Some((pid, since)) = parse_lock_contents(&contents) {
                    if process_alive(pid) {
                        let age_secs = SystemTime::now()
                            .duration_since(since)
                            .unwrap_or_default()
                            .as_secs();
                        if force {
                            let _ = nix::sys::signal::kill(
                                nix::unistd::Pid::from_raw(pid),
                                nix::sys::signal::Signal::SIGKILL,
                            );
                        } else if age_secs < STALE_LOCK_AGE_SECS {
                            return Err(FaubError::LockContention { pid, since });
                        } else {
                            log::warn!(
                                "reclaiming lock {:?} abandoned by pid {pid} ({age_secs}s old, sending SIGTERM)",
                                path
                            );
                            let _ = nix::sys::signal::kill(
                                nix::unistd::Pid::from_raw(pid),
                                nix::sys::signal::Signal::SIGTERM,
                            );
                        }
                    }
                }
                // Stale (holder already gone) or reclaimed above.
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(FaubError::io(&path, e)),
        }

        let pid = std::process::id();
        let since = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        fs::write(&path, format!("{pid}\n{since}\n")).map_err(|e| FaubError::io(&path, e))?;
        Ok(LockGuard { path })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("failed to remove lock file {:?}: {e}", self.path);
        }
    }
}

fn parse_lock_contents(contents: &str) -> Option<(i32, SystemTime)> {
    let mut lines = contents.lines();
    let pid: i32 = lines.next()?.trim().parse().ok()?;
    let since_secs: u64 = lines.next().and_then(|l| l.trim().parse().ok()).unwrap_or(0);
    Some((
        pid,
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(since_secs),
    ))
}

fn process_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

/// Cooperative interrupt flag, polled by the protocol engine between phase
/// boundaries rather than acted on inside a signal handler.
///
/// The original's handler for `SIGINT`/`SIGTERM` sets a global and records
/// the name of whatever temp file/lock is currently in flight, so the main
/// loop can remove exactly that file on its next safe-to-check point. This
/// splits that into an atomic flag for "should I stop" and a
/// `parking_lot::Mutex`-guarded slot for "what am I currently holding that
/// needs cleanup if I do".
#[derive(Clone)]
pub struct Supervisor {
    interrupted: Arc<AtomicBool>,
    interrupt_filename: Arc<Mutex<Option<PathBuf>>>,
    interrupt_lock: Arc<Mutex<()>>,
}

impl Supervisor {
    /// A fresh, not-yet-interrupted supervisor.
    pub fn new() -> Self {
        Supervisor {
            interrupted: Arc::new(AtomicBool::new(false)),
            interrupt_filename: Arc::new(Mutex::new(None)),
            interrupt_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Record the path that should be cleaned up if an interrupt lands
    /// before the next call to [`Supervisor::clear_pending`].
    pub fn mark_pending(&self, path: impl Into<PathBuf>) {
        let _guard = self.interrupt_lock.lock();
        *self.interrupt_filename.lock() = Some(path.into());
    }

    /// Clear the pending path once the operation that created it completed
    /// cleanly.
    pub fn clear_pending(&self) {
        let _guard = self.interrupt_lock.lock();
        *self.interrupt_filename.lock() = None;
    }

    /// Call from a signal handler: sets the interrupted flag only. Safe to
    /// call from async-signal-handler context since it touches only an
    /// atomic.
    pub fn request_stop(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn should_stop(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Poll point: if a stop was requested, remove whatever path is
    /// currently marked pending and return true so the caller can unwind.
    pub fn check_and_cleanup(&self) -> bool {
        if !self.should_stop() {
            return false;
        }
        let _guard = self.interrupt_lock.lock();
        if let Some(path) = self.interrupt_filename.lock().take() {
            if let Err(e) = remove_path(&path) {
                log::warn!("interrupt cleanup of {path:?} failed: {e}");
            }
        }
        true
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_contend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.lock");
        let guard = LockGuard::acquire(&path).unwrap();
        let result = LockGuard::acquire(&path);
        assert!(matches!(result, Err(FaubError::LockContention { .. })));
        drop(guard);
        assert!(LockGuard::acquire(&path).is_ok());
    }

    /// Spawn a short-lived child to stand in for "some other live process",
    /// so these tests never signal the test runner's own pid.
    fn spawn_live_child() -> std::process::Child {
        std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .expect("spawning a throwaway child process")
    }

    #[test]
    fn fresh_lock_from_a_live_pid_refuses_without_force() {
        let mut child = spawn_live_child();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.lock");
        let since = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        fs::write(&path, format!("{}\n{since}\n", child.id())).unwrap();

        let result = LockGuard::acquire_with_force(&path, false);
        assert!(matches!(result, Err(FaubError::LockContention { .. })));

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn abandoned_lock_past_24h_is_reclaimed_without_force() {
        let mut child = spawn_live_child();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.lock");
        let since = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            - (STALE_LOCK_AGE_SECS + 60);
        fs::write(&path, format!("{}\n{since}\n", child.id())).unwrap();

        // Reclaiming an abandoned lock sends SIGTERM to its holder.
        assert!(LockGuard::acquire_with_force(&path, false).is_ok());

        let _ = child.wait();
    }

    #[test]
    fn force_reclaims_a_fresh_live_lock() {
        let mut child = spawn_live_child();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.lock");
        let since = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        fs::write(&path, format!("{}\n{since}\n", child.id())).unwrap();

        assert!(LockGuard::acquire_with_force(&path, true).is_ok());

        let _ = child.wait();
    }

    #[test]
    fn supervisor_cleanup_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inprogress");
        std::fs::write(&path, b"x").unwrap();

        let sup = Supervisor::new();
        sup.mark_pending(&path);
        assert!(!sup.check_and_cleanup());
        sup.request_stop();
        assert!(sup.check_and_cleanup());
        assert!(!path.exists());
    }
}
