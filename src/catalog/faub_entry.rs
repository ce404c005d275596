//! One backup directory: the row type of the Faub catalog.
//!
//! Grounded in `FaubEntry.h`/`FaubCache.cc`'s per-backup record, which
//! tracks a completed backup directory's identity, size, and retention
//! metadata. Persisted as JSON sidecars (`.faub_stats`, `.faub_inodes`,
//! `.faub_diff`) alongside the backup directory itself, per the original's
//! one-file-per-concern layout, rather than folded into the ordered map's
//! own serialized blob — this lets an operator inspect a single backup's
//! stats without decoding the whole catalog.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FaubError, Result};
use crate::time_util::{self, CalendarFields};

/// Parse `YYYY-MM-DD` (optionally dash-free, optionally followed by a time
/// suffix) out of a backup directory name, the same way
/// `BackupEntry::updateAges` in the original derives a file's age from its
/// enclosing backup directory's name rather than its `mtime` — since a
/// hardlinked file's mtime reflects whichever backup first captured it, not
/// the backup directory it's currently found under. Shares the regex with
/// [`crate::catalog::entry::BackupEntry::calendar_fields`]'s filename-date
/// parser, the per-file analog of this per-directory one.
fn calendar_fields_from_directory(directory: &str) -> Option<CalendarFields> {
    time_util::calendar_fields_from_name(directory)
}

/// Disk usage accounting for one backup directory.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskStats {
    /// Sum of file sizes actually stored (post-dedup) under this directory.
    pub bytes_unique: u64,
    /// Sum of file sizes this directory would occupy with no hardlinking.
    pub bytes_logical: u64,
    /// Number of regular files.
    pub file_count: u64,
}

/// One completed backup directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaubEntry {
    /// Directory name, e.g. `2026-07-27_030000`.
    pub directory: String,
    /// Owning profile name.
    pub profile: String,
    /// Opaque identifier assigned at backup creation, used by tagging.
    pub uuid: String,
    /// Inode numbers of every regular file under this directory, used by
    /// the linking engine to detect files this backup already shares with
    /// a sibling without re-reading content.
    pub inodes: HashSet<u64>,
    /// Disk accounting.
    pub stats: DiskStats,
    /// When the backup run that produced this directory finished (unix secs).
    pub finish_time: i64,
    /// Calendar fields derived from the directory name at creation time,
    /// not from `finish_time` — directory contents get hardlinked across
    /// many backups and so share one mtime, the same reason
    /// `BackupEntry::updateAges` in the original parses dates out of the
    /// filename instead of trusting `stat()`.
    pub start_year: i32,
    pub start_month: u32,
    pub start_day: u32,
    pub start_dow: u32,
    /// How long the backup run took, in seconds.
    pub duration_secs: i64,
    /// Unix-seconds floor this entry is protected from pruning until, or
    /// `None` if unheld. Set by the tagging store's hold-expiry map.
    pub hold_until: Option<i64>,
    /// Set when this entry's on-disk stats no longer match the sidecar
    /// (e.g. after a `compare`/`analyze` pass finds drift) and a rewrite
    /// is pending.
    pub updated: bool,
    /// Paths (relative to `directory`) modified by this backup run relative
    /// to the previous snapshot, persisted as the `.faub_diff` sidecar and
    /// consumed by [`crate::diagnostics::analyze`].
    pub modified_files: Vec<String>,
}

impl FaubEntry {
    /// Build a new entry for a freshly finished backup, deriving calendar
    /// fields from `directory`'s own timestamp components rather than
    /// `finish_time`.
    pub fn new(
        directory: impl Into<String>,
        profile: impl Into<String>,
        uuid: impl Into<String>,
        finish_time: i64,
        duration_secs: i64,
    ) -> Self {
        let directory = directory.into();
        let CalendarFields {
            year,
            month,
            day,
            day_of_week,
        } = calendar_fields_from_directory(&directory).unwrap_or_else(|| time_util::calendar_fields(finish_time));
        FaubEntry {
            directory,
            profile: profile.into(),
            uuid: uuid.into(),
            inodes: HashSet::new(),
            stats: DiskStats::default(),
            finish_time,
            start_year: year,
            start_month: month,
            start_day: day,
            start_dow: day_of_week,
            duration_secs,
            hold_until: None,
            updated: false,
            modified_files: Vec::new(),
        }
    }

    /// Days between `reference` and this backup's finish time.
    pub fn day_age(&self, reference: i64) -> i64 {
        time_util::day_age(reference, self.finish_time)
    }

    /// Whether a hold is currently in effect at `now`.
    pub fn is_held(&self, now: i64) -> bool {
        self.hold_until.map(|until| until > now).unwrap_or(false)
    }

    fn sidecar(dir: &Path, suffix: &str) -> PathBuf {
        dir.join(suffix)
    }

    /// Write the `.faub_stats` sidecar (JSON: everything but the inode set).
    pub fn save_stats(&self, backup_dir: &Path) -> Result<()> {
        let path = Self::sidecar(backup_dir, ".faub_stats");
        let json = serde_json::to_vec_pretty(&StatsSidecar::from(self))
            .map_err(|e| FaubError::Protocol(format!("stats encode failed: {e}")))?;
        std::fs::write(&path, json).map_err(|e| FaubError::io(&path, e))
    }

    /// Write the `.faub_inodes` sidecar (one inode number per line).
    pub fn save_inodes(&self, backup_dir: &Path) -> Result<()> {
        let path = Self::sidecar(backup_dir, ".faub_inodes");
        let mut body = String::new();
        let mut sorted: Vec<_> = self.inodes.iter().copied().collect();
        sorted.sort_unstable();
        for inode in sorted {
            body.push_str(&inode.to_string());
            body.push('\n');
        }
        std::fs::write(&path, body).map_err(|e| FaubError::io(&path, e))
    }

    /// Write the `.faub_diff` sidecar (one modified relative path per line),
    /// the list a prior backup run recorded while deciding its needed list
    /// in phase 1 of the protocol engine.
    pub fn save_diff(&self, backup_dir: &Path) -> Result<()> {
        let path = Self::sidecar(backup_dir, ".faub_diff");
        let mut body = String::new();
        for relative in &self.modified_files {
            body.push_str(relative);
            body.push('\n');
        }
        std::fs::write(&path, body).map_err(|e| FaubError::io(&path, e))
    }

    /// Load all three sidecars for a backup directory, reconstructing the
    /// entry. The diff sidecar is optional: its absence (an older backup,
    /// or one with nothing modified) yields an empty modified-files list
    /// rather than an error.
    pub fn load(backup_dir: &Path, directory_name: &str) -> Result<Self> {
        let stats_path = Self::sidecar(backup_dir, ".faub_stats");
        let raw = std::fs::read(&stats_path).map_err(|e| FaubError::io(&stats_path, e))?;
        let sidecar: StatsSidecar = serde_json::from_slice(&raw)
            .map_err(|e| FaubError::Protocol(format!("stats decode failed: {e}")))?;

        let inodes_path = Self::sidecar(backup_dir, ".faub_inodes");
        let inodes = match std::fs::read_to_string(&inodes_path) {
            Ok(text) => text
                .lines()
                .filter_map(|l| l.trim().parse::<u64>().ok())
                .collect(),
            Err(_) => HashSet::new(),
        };

        let diff_path = Self::sidecar(backup_dir, ".faub_diff");
        let modified_files = match std::fs::read_to_string(&diff_path) {
            Ok(text) => text.lines().map(|l| l.to_string()).collect(),
            Err(_) => Vec::new(),
        };

        Ok(FaubEntry {
            directory: directory_name.to_string(),
            profile: sidecar.profile,
            uuid: sidecar.uuid,
            inodes,
            stats: sidecar.stats,
            finish_time: sidecar.finish_time,
            start_year: sidecar.start_year,
            start_month: sidecar.start_month,
            start_day: sidecar.start_day,
            start_dow: sidecar.start_dow,
            duration_secs: sidecar.duration_secs,
            hold_until: sidecar.hold_until,
            updated: false,
            modified_files,
        })
    }
}

/// Everything in [`FaubEntry`] except the inode set and the in-memory-only
/// `directory`/`updated` fields, which is what actually gets written to
/// `.faub_stats`.
#[derive(Debug, Serialize, Deserialize)]
struct StatsSidecar {
    profile: String,
    uuid: String,
    stats: DiskStats,
    finish_time: i64,
    start_year: i32,
    start_month: u32,
    start_day: u32,
    start_dow: u32,
    duration_secs: i64,
    hold_until: Option<i64>,
}

impl From<&FaubEntry> for StatsSidecar {
    fn from(e: &FaubEntry) -> Self {
        StatsSidecar {
            profile: e.profile.clone(),
            uuid: e.uuid.clone(),
            stats: e.stats,
            finish_time: e.finish_time,
            start_year: e.start_year,
            start_month: e.start_month,
            start_day: e.start_day,
            start_dow: e.start_dow,
            duration_secs: e.duration_secs,
            hold_until: e.hold_until,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut entry = FaubEntry::new("2026-07-27_030000", "home", "uuid-1", 1_800_000_000, 42);
        entry.inodes.insert(7);
        entry.inodes.insert(3);
        entry.stats = DiskStats {
            bytes_unique: 100,
            bytes_logical: 300,
            file_count: 4,
        };
        entry.modified_files = vec!["a.txt".to_string(), "sub/b.txt".to_string()];
        entry.save_stats(dir.path()).unwrap();
        entry.save_inodes(dir.path()).unwrap();
        entry.save_diff(dir.path()).unwrap();

        let loaded = FaubEntry::load(dir.path(), &entry.directory).unwrap();
        assert_eq!(loaded.stats, entry.stats);
        assert_eq!(loaded.inodes, entry.inodes);
        assert_eq!(loaded.start_year, entry.start_year);
        assert_eq!(loaded.modified_files, entry.modified_files);
    }

    #[test]
    fn missing_diff_sidecar_yields_empty_modified_files() {
        let dir = tempfile::tempdir().unwrap();
        let entry = FaubEntry::new("2026-07-27_030000", "home", "uuid-1", 1_800_000_000, 42);
        entry.save_stats(dir.path()).unwrap();
        entry.save_inodes(dir.path()).unwrap();

        let loaded = FaubEntry::load(dir.path(), &entry.directory).unwrap();
        assert!(loaded.modified_files.is_empty());
    }

    #[test]
    fn hold_expiry_respects_now() {
        let mut entry = FaubEntry::new("d", "p", "u", 0, 0);
        entry.hold_until = Some(100);
        assert!(entry.is_held(50));
        assert!(!entry.is_held(150));
    }
}
