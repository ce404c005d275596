//! The Faub catalog: an ordered map of backup directories for one profile,
//! keyed by directory name under a comparator that ignores dashes so that
//! `2026-07-27_030000` and `20260727_030000`-style names sort identically
//! to chronological order regardless of which separator convention a given
//! profile's directories use.
//!
//! Grounded in `FaubCache.cc`'s `std::map<string, FaubEntry, dashInsensitive>`
//! (the original strips `-` before comparing directory names). The Rust
//! rendering uses a thin [`DashInsensitiveKey`] newtype via `ref-cast` so
//! `BTreeMap` can order on it without allocating a stripped copy of every
//! key just to compare two of them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ref_cast::RefCast;

use crate::error::{FaubError, Result};

use super::faub_entry::FaubEntry;

/// A `str` wrapper whose `Ord`/`PartialOrd` compare with dashes stripped.
/// `#[repr(transparent)]` + `RefCast` lets us borrow a plain `&str` as this
/// type with no allocation, so lookups by borrowed key don't need to build
/// an owned stripped string either.
#[derive(Debug, RefCast)]
#[repr(transparent)]
pub struct DashInsensitiveKey(str);

impl DashInsensitiveKey {
    /// Borrow `s` as a dash-insensitive comparison key.
    pub fn new(s: &str) -> &Self {
        Self::ref_cast(s)
    }

    fn stripped(&self) -> String {
        self.0.chars().filter(|&c| c != '-').collect()
    }
}

impl PartialEq for DashInsensitiveKey {
    fn eq(&self, other: &Self) -> bool {
        self.stripped() == other.stripped()
    }
}
impl Eq for DashInsensitiveKey {}

impl PartialOrd for DashInsensitiveKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DashInsensitiveKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.stripped().cmp(&other.stripped())
    }
}

/// Owned counterpart stored as the map's actual key.
#[derive(Debug, Clone)]
pub struct DirectoryKey(String);

impl DirectoryKey {
    fn borrow_cmp(&self) -> &DashInsensitiveKey {
        DashInsensitiveKey::new(&self.0)
    }
}

// `DirectoryKey`'s own `Ord`/`Eq` delegate entirely to the dash-insensitive
// comparison, so the `BTreeMap` below stays chronologically ordered
// regardless of a profile's dash convention — deriving these directly would
// compare the raw `String` instead and silently defeat the comparator.
impl PartialEq for DirectoryKey {
    fn eq(&self, other: &Self) -> bool {
        self.borrow_cmp() == other.borrow_cmp()
    }
}
impl Eq for DirectoryKey {}
impl PartialOrd for DirectoryKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DirectoryKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.borrow_cmp().cmp(other.borrow_cmp())
    }
}

impl std::borrow::Borrow<DashInsensitiveKey> for DirectoryKey {
    fn borrow(&self) -> &DashInsensitiveKey {
        self.borrow_cmp()
    }
}

/// Whether `next_one_too` prunes one additional backup immediately after a
/// kept one (see the retention engine's consolidation pass). Kept as a
/// literal on/off toggle re-evaluated per entry, not a sticky latch that
/// persists once tripped, resolving the ambiguity in the retention design
/// notes explicitly in the toggle's favor.
pub type NextOneToo = bool;

/// All backups known for one profile, ordered chronologically by directory
/// name under dash-insensitive comparison.
#[derive(Debug, Default)]
pub struct FaubCache {
    entries: BTreeMap<DirectoryKey, FaubEntry>,
}

impl FaubCache {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `profile_root` for backup directories (anything with a
    /// `.faub_stats` sidecar) and load each into the catalog, replacing any
    /// prior contents. Mirrors `FaubCache::restore`.
    pub fn restore(profile_root: &Path, profile: &str) -> Result<Self> {
        let mut cache = FaubCache::new();
        let read_dir = std::fs::read_dir(profile_root).map_err(|e| FaubError::io(profile_root, e))?;
        for entry in read_dir {
            let entry = entry.map_err(|e| FaubError::io(profile_root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if !path.join(".faub_stats").exists() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let loaded = FaubEntry::load(&path, &name)?;
            cache.entries.insert(DirectoryKey(name), loaded);
        }
        let _ = profile;
        Ok(cache)
    }

    /// Insert or replace a backup's entry.
    pub fn insert(&mut self, entry: FaubEntry) {
        self.entries.insert(DirectoryKey(entry.directory.clone()), entry);
    }

    /// Look up by directory name.
    pub fn get(&self, directory: &str) -> Option<&FaubEntry> {
        self.entries.get(DashInsensitiveKey::new(directory))
    }

    /// Remove a backup from the catalog (does not touch the filesystem;
    /// callers use [`super::super::linking`] / [`super::super::retention`]
    /// to remove the directory itself first).
    pub fn remove(&mut self, directory: &str) -> Option<FaubEntry> {
        self.entries.remove(DashInsensitiveKey::new(directory))
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &FaubEntry> {
        self.entries.values()
    }

    /// Number of backups.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no backups.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-derive disk-usage stats from the live filesystem for any entry
    /// with a cache miss (both `bytes_unique` and `bytes_logical` still
    /// zero), honoring `next_one_too` by also recomputing the
    /// immediately-following entry once a drifted one is found (so a
    /// consolidation that changed backup N's unique-byte count is
    /// reflected in N+1's logical/unique delta too).
    ///
    /// Walks chronologically, carrying a running `seen_inodes` set forward
    /// from each entry to the next — mirroring `DiskUsage(path, prevInodes,
    /// newInodes)`'s "inherited inodes set", where each entry's own inode
    /// set already transitively contains everything hardlinked forward from
    /// earlier backups, so only the immediately preceding entry's set needs
    /// to be kept in memory at a time.
    pub fn recache(&mut self, profile_root: &Path, next_one_too: NextOneToo) -> Result<()> {
        let keys: Vec<String> = self.entries.keys().map(|k| k.0.clone()).collect();
        let mut recompute_next = false;
        let mut seen_inodes: std::collections::HashSet<u64> = std::collections::HashSet::new();

        for name in keys {
            let dir = profile_root.join(&name);
            let key = DirectoryKey(name.clone());
            let cache_miss = self
                .entries
                .get(&key)
                .map(|e| e.stats.bytes_unique == 0 && e.stats.bytes_logical == 0)
                .unwrap_or(true);

            if cache_miss || recompute_next {
                let (stats, new_inodes) = compute_disk_stats(&dir, &seen_inodes)?;
                let drifted = self
                    .entries
                    .get(&key)
                    .map(|e| e.stats != stats)
                    .unwrap_or(true);
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.stats = stats;
                    entry.inodes = new_inodes.clone();
                    entry.updated = true;
                    entry.save_stats(&dir)?;
                    entry.save_inodes(&dir)?;
                }
                seen_inodes = new_inodes;
                recompute_next = next_one_too && drifted;
            } else {
                if let Some(entry) = self.entries.get(&key) {
                    seen_inodes = entry.inodes.clone();
                }
                recompute_next = false;
            }
        }
        Ok(())
    }

    /// Total unique and logical bytes across every backup in the profile.
    pub fn disk_usage(&self) -> (u64, u64) {
        self.entries.values().fold((0, 0), |(u, l), e| {
            (u + e.stats.bytes_unique, l + e.stats.bytes_logical)
        })
    }
}

/// Walk `dir` and classify every regular file's inode against `seen_inodes`
/// (everything hardlinked forward from the previous chronological entry),
/// matching `DiskUsage(path, seenInodes, newInodes)`: an inode not in
/// `seen_inodes` contributes its size to `bytes_unique` (new content this
/// backup actually occupies on disk) and is recorded into the returned
/// inode set; one already in `seen_inodes` (or already seen earlier in this
/// same walk) contributes to `bytes_logical` only, since its bytes are
/// shared with an earlier snapshot. `bytes_logical` always accumulates
/// every file's size, matching "what this directory would occupy with no
/// hardlinking".
fn compute_disk_stats(
    dir: &Path,
    seen_inodes: &std::collections::HashSet<u64>,
) -> Result<(super::faub_entry::DiskStats, std::collections::HashSet<u64>)> {
    let mut stats = super::faub_entry::DiskStats::default();
    let mut new_inodes: std::collections::HashSet<u64> = std::collections::HashSet::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let read_dir = match std::fs::read_dir(&current) {
            Ok(r) => r,
            Err(_) => continue,
        };
        for entry in read_dir {
            let entry = entry.map_err(|e| FaubError::io(&current, e))?;
            let meta = entry.metadata().map_err(|e| FaubError::io(entry.path(), e))?;
            if meta.is_dir() {
                stack.push(entry.path());
            } else if meta.is_file() {
                use std::os::unix::fs::MetadataExt;
                let ino = meta.ino();
                stats.file_count += 1;
                stats.bytes_logical += meta.size();
                if !seen_inodes.contains(&ino) && !new_inodes.contains(&ino) {
                    stats.bytes_unique += meta.size();
                }
                new_inodes.insert(ino);
            }
        }
    }
    Ok((stats, new_inodes))
}

/// Convenience re-export so callers can construct keys without reaching
/// into this module's internals.
pub fn profile_path(cache_dir: &Path, profile: &str) -> PathBuf {
    cache_dir.join(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_insensitive_ordering() {
        let mut cache = FaubCache::new();
        cache.insert(FaubEntry::new("2026-07-27_0300", "p", "u1", 2, 1));
        cache.insert(FaubEntry::new("20260726_0300", "p", "u2", 1, 1));

        let names: Vec<_> = cache.entries().map(|e| e.directory.clone()).collect();
        assert_eq!(names, vec!["20260726_0300", "2026-07-27_0300"]);
    }

    #[test]
    fn get_ignores_dash_convention() {
        let mut cache = FaubCache::new();
        cache.insert(FaubEntry::new("2026-07-27_0300", "p", "u1", 2, 1));
        assert!(cache.get("20260727_0300").is_some());
    }

    #[test]
    fn recache_carries_shared_inodes_forward_chronologically() {
        let root = tempfile::tempdir().unwrap();
        let day1 = root.path().join("day1");
        let day2 = root.path().join("day2");
        std::fs::create_dir(&day1).unwrap();
        std::fs::create_dir(&day2).unwrap();
        std::fs::write(day1.join("a.txt"), b"0123456789").unwrap();
        // day2/a.txt is hardlinked forward (unchanged content); b.txt is new.
        std::fs::hard_link(day1.join("a.txt"), day2.join("a.txt")).unwrap();
        std::fs::write(day2.join("b.txt"), b"new content").unwrap();

        let mut cache = FaubCache::new();
        cache.insert(FaubEntry::new("day1", "p", "u1", 1, 1));
        cache.insert(FaubEntry::new("day2", "p", "u2", 2, 1));

        cache.recache(root.path(), false).unwrap();

        let e1 = cache.get("day1").unwrap();
        assert_eq!(e1.stats.bytes_unique, 10);
        assert_eq!(e1.stats.bytes_logical, 10);

        let e2 = cache.get("day2").unwrap();
        // a.txt's inode was already seen in day1, so only b.txt counts as new.
        assert_eq!(e2.stats.bytes_unique, 11);
        assert_eq!(e2.stats.bytes_logical, 21);
    }
}
