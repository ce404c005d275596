//! Process-wide-in-spirit runtime settings, rendered as an explicit value
//! instead of a global singleton.
//!
//! The original keeps a single `global_vars` struct (`globals.h`) touched
//! from everywhere. Here it's an explicit [`Environment`] threaded by
//! reference through every engine entry point that needs it.

use std::path::PathBuf;
use std::time::SystemTime;

use bitflags::bitflags;

bitflags! {
    /// Debug-selector bits, the Rust rendering of the original's `DEBUG_*` macros.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugFlags: u32 {
        /// Log catalog scan decisions (cache hit/miss reasons).
        const SCAN = 1 << 0;
        /// Log every protocol-engine phase transition.
        const PROTOCOL = 1 << 1;
        /// Log retention keep/delete decisions per entry.
        const RETENTION = 1 << 2;
        /// Log linking engine bucket processing.
        const LINKING = 1 << 3;
        /// Log lock acquisition/release.
        const LOCK = 1 << 4;
    }
}

/// Explicit runtime context threaded through the engine.
///
/// Construct with [`Environment::new`] and pass by shared reference (or wrap
/// in `Arc` for the protocol engine's child-process boundary); nothing in
/// this crate reaches for a global/static equivalent.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Directory holding catalogs, sidecars, lock files, tag files.
    pub cache_dir: PathBuf,
    /// Directory holding the text log, when not using syslog.
    pub log_dir: PathBuf,
    /// This process's pid, used for lock files and in-process temp names.
    pub pid: u32,
    /// When this invocation started; used for lock staleness checks.
    pub start_time: SystemTime,
    /// Which categories of diagnostic logging are enabled.
    pub debug_mask: DebugFlags,
    /// Whether to emit ANSI color in any text the embedder renders.
    pub color: bool,
    /// When set, destructive operations (unlink/rmrf of stale in-process
    /// artifacts) are logged but not performed; used by the test suite.
    pub test_mode: bool,
    /// Running count of MD5 computations performed, for observability.
    pub md5_count: u64,
    /// Running count of stat/lstat calls performed, for observability.
    pub stat_count: u64,
}

impl Environment {
    /// Build an environment rooted at `cache_dir`/`log_dir` for the current process.
    pub fn new(cache_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Environment {
            cache_dir: cache_dir.into(),
            log_dir: log_dir.into(),
            pid: std::process::id(),
            start_time: SystemTime::now(),
            debug_mask: DebugFlags::empty(),
            color: false,
            test_mode: false,
            md5_count: 0,
            stat_count: 0,
        }
    }

    /// An environment suitable for unit/integration tests: test mode on,
    /// rooted at the given temp directory for both cache and log.
    pub fn for_test(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let mut env = Environment::new(dir.clone(), dir);
        env.test_mode = true;
        env
    }

    /// True if `mask` debugging is enabled.
    pub fn debug(&self, mask: DebugFlags) -> bool {
        self.debug_mask.contains(mask)
    }
}
