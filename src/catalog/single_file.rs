//! The single-file catalog: a three-way index over [`BackupEntry`] rows.
//!
//! Grounded in `BackupCache.cc`. `rawData` is the sole owner of each row
//! (by rowid); `byFilename` and `byMD5` map keys to rowids only, mirroring
//! the original's three parallel containers and its `addOrUpdate` semantics
//! exactly: look up by filename first, and if the MD5 changed, move the
//! rowid between MD5 buckets rather than touching the filename index.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FaubError, Result};

use super::entry::{BackupEntry, Fingerprint};

/// Persisted catalog state: the row vector plus both indexes, serialized
/// as one `bincode` blob. The indexes are redundant with `raw_data` and are
/// rebuilt from it on [`BackupCache::restore`] rather than trusted blindly
/// from disk, the way the original's `BackupCache::restore` re-derives
/// `byFilename`/`byMD5` from the rows it reads back in.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    raw_data: Vec<BackupEntry>,
}

/// In-memory catalog of a single backup-destination directory's files.
#[derive(Debug, Default)]
pub struct BackupCache {
    raw_data: HashMap<u64, BackupEntry>,
    by_filename: HashMap<String, u64>,
    by_md5: HashMap<Fingerprint, Vec<u64>>,
    next_rowid: u64,
}

impl BackupCache {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly scanned file, or update the existing row for its
    /// filename. Returns the row's rowid.
    ///
    /// If the filename is new, the row is assigned `max(existing)+1` and
    /// inserted into all three structures. If the filename already exists
    /// and the fingerprint changed, the rowid is moved from its old MD5
    /// bucket to the new one; if the fingerprint is unchanged, only the
    /// stat fields (size/inode/links/mtime) are refreshed in place.
    pub fn add_or_update(
        &mut self,
        filename: impl Into<String>,
        fingerprint: Fingerprint,
        size: u64,
        inode: u64,
        links: u64,
        mtime: i64,
    ) -> u64 {
        let filename = filename.into();

        if let Some(&rowid) = self.by_filename.get(&filename) {
            let row = self.raw_data.get_mut(&rowid).expect("index/row consistency");
            if row.fingerprint != fingerprint {
                remove_from_bucket(&mut self.by_md5, row.fingerprint, rowid);
                self.by_md5.entry(fingerprint).or_default().push(rowid);
                row.fingerprint = fingerprint;
            }
            row.size = size;
            row.inode = inode;
            row.links = links;
            row.mtime = mtime;
            return rowid;
        }

        let rowid = self.next_rowid;
        self.next_rowid += 1;
        let row = BackupEntry {
            rowid,
            filename: filename.clone(),
            fingerprint,
            size,
            inode,
            links,
            mtime,
        };
        self.raw_data.insert(rowid, row);
        self.by_filename.insert(filename, rowid);
        self.by_md5.entry(fingerprint).or_default().push(rowid);
        rowid
    }

    /// Look up the current row for a filename.
    pub fn get_by_filename(&self, filename: &str) -> Option<&BackupEntry> {
        self.by_filename.get(filename).and_then(|id| self.raw_data.get(id))
    }

    /// All rows sharing a fingerprint (the hardlinking engine's bucket).
    pub fn get_by_fingerprint(&self, fingerprint: Fingerprint) -> Vec<&BackupEntry> {
        self.by_md5
            .get(&fingerprint)
            .into_iter()
            .flatten()
            .filter_map(|id| self.raw_data.get(id))
            .collect()
    }

    /// Every fingerprint currently present, for bucket iteration.
    pub fn fingerprints(&self) -> impl Iterator<Item = Fingerprint> + '_ {
        self.by_md5.keys().copied()
    }

    /// Remove a file entirely (all three structures).
    pub fn remove(&mut self, filename: &str) -> Option<BackupEntry> {
        let rowid = self.by_filename.remove(filename)?;
        let row = self.raw_data.remove(&rowid)?;
        remove_from_bucket(&mut self.by_md5, row.fingerprint, rowid);
        Some(row)
    }

    /// Refresh a row's stat fields without touching its fingerprint,
    /// matching `reStat`'s "file didn't change content, just metadata".
    pub fn re_stat(&mut self, filename: &str, size: u64, inode: u64, links: u64, mtime: i64) -> bool {
        let Some(&rowid) = self.by_filename.get(filename) else {
            return false;
        };
        if let Some(row) = self.raw_data.get_mut(&rowid) {
            row.size = size;
            row.inode = inode;
            row.links = links;
            row.mtime = mtime;
            true
        } else {
            false
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.raw_data.len()
    }

    /// Whether the catalog has no rows.
    pub fn is_empty(&self) -> bool {
        self.raw_data.is_empty()
    }

    /// All rows, in no particular order.
    pub fn rows(&self) -> impl Iterator<Item = &BackupEntry> {
        self.raw_data.values()
    }

    /// Serialize to `path` via a temp-file-then-rename, matching the
    /// original's crash-safe commit style (see also `fastcache.rs`).
    pub fn persist(&self, path: &Path) -> Result<()> {
        let persisted = Persisted {
            raw_data: self.raw_data.values().cloned().collect(),
        };
        let bytes = bincode::serialize(&persisted)
            .map_err(|e| FaubError::Protocol(format!("catalog encode failed: {e}")))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| FaubError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| FaubError::io(path, e))?;
        Ok(())
    }

    /// Restore from a previously persisted catalog, rebuilding both indexes
    /// from the row vector rather than trusting any index persisted inline.
    pub fn restore(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| FaubError::io(path, e))?;
        let persisted: Persisted = bincode::deserialize(&bytes)
            .map_err(|e| FaubError::Protocol(format!("catalog decode failed: {e}")))?;

        let mut cache = BackupCache::new();
        for row in persisted.raw_data {
            cache.next_rowid = cache.next_rowid.max(row.rowid + 1);
            cache.by_filename.insert(row.filename.clone(), row.rowid);
            cache.by_md5.entry(row.fingerprint).or_default().push(row.rowid);
            cache.raw_data.insert(row.rowid, row);
        }
        Ok(cache)
    }
}

fn remove_from_bucket(by_md5: &mut HashMap<Fingerprint, Vec<u64>>, fp: Fingerprint, rowid: u64) {
    if let Some(bucket) = by_md5.get_mut(&fp) {
        bucket.retain(|&id| id != rowid);
        if bucket.is_empty() {
            by_md5.remove(&fp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint([byte; 16])
    }

    #[test]
    fn add_or_update_assigns_increasing_rowids() {
        let mut cache = BackupCache::new();
        let a = cache.add_or_update("a.txt", fp(1), 10, 1, 1, 100);
        let b = cache.add_or_update("b.txt", fp(2), 20, 2, 1, 200);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn changed_fingerprint_moves_md5_bucket() {
        let mut cache = BackupCache::new();
        cache.add_or_update("a.txt", fp(1), 10, 1, 1, 100);
        assert_eq!(cache.get_by_fingerprint(fp(1)).len(), 1);

        cache.add_or_update("a.txt", fp(2), 11, 1, 1, 101);
        assert_eq!(cache.get_by_fingerprint(fp(1)).len(), 0);
        assert_eq!(cache.get_by_fingerprint(fp(2)).len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn persist_and_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = BackupCache::new();
        cache.add_or_update("a.txt", fp(1), 10, 1, 1, 100);
        cache.add_or_update("b.txt", fp(1), 10, 2, 2, 100);

        let path = dir.path().join("catalog.bin");
        cache.persist(&path).unwrap();

        let restored = BackupCache::restore(&path).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get_by_fingerprint(fp(1)).len(), 2);
        assert!(restored.get_by_filename("a.txt").is_some());
    }
}
