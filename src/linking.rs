//! Cross-backup hardlinking: identical-content files across different
//! backup directories share one inode on disk.
//!
//! Grounded in `faub.cc`'s `linkBackup()`: for every fingerprint bucket in
//! the single-file catalog, walk its rows in a stable order and hardlink
//! each to a running representative, starting a fresh representative
//! whenever the current one's link count would exceed `max_links` (the
//! filesystem's per-inode hardlink ceiling, typically `LINK_MAX`). Buckets
//! are independent per fingerprint, so one bucket splitting doesn't change
//! any other bucket's membership — a single pass over every fingerprint
//! handles arbitrarily many splits within a bucket without needing to
//! revisit earlier fingerprints, and re-running the whole pass against an
//! already-linked catalog is a no-op (linking is idempotent), since
//! already-shared inodes are detected and skipped.

use std::collections::HashMap;
use std::path::Path;

use crate::catalog::single_file::BackupCache;
use crate::catalog::Fingerprint;
use crate::error::{FaubError, Result};

/// Outcome of a linking pass.
#[derive(Debug, Default)]
pub struct LinkReport {
    /// Number of files hardlinked to a representative this pass.
    pub linked: u64,
    /// Number of times a bucket was split because it hit `max_links`.
    pub bucket_splits: u64,
}

/// Hardlink every row in `cache` sharing a fingerprint to one representative
/// under `backup_root`, honoring `max_links` per inode.
///
/// The representative for a bucket is chosen as the entry with the highest
/// current link count among those both under `max_links` and with a
/// nonzero filename-derived day age relative to `now` — a same-day entry
/// (age 0) is excluded from consideration since its file may still be
/// actively written by the backup run that just produced it, matching
/// `linkBackup`'s reluctance to pick today's file as the link target.
pub fn link_backup(cache: &BackupCache, backup_root: &Path, max_links: u64, now: i64) -> Result<LinkReport> {
    let mut report = LinkReport::default();

    for fingerprint in cache.fingerprints() {
        let rows = cache.get_by_fingerprint(fingerprint);
        if rows.len() < 2 {
            continue;
        }

        let mut remaining: Vec<&crate::catalog::BackupEntry> = rows;
        remaining.sort_by_key(|r| r.rowid);

        let Some(mut representative) = pick_representative(&remaining, backup_root, max_links, now)? else {
            // No eligible candidate (every row is today's or already full);
            // nothing to link this pass.
            continue;
        };
        let mut representative_links = current_link_count(backup_root, representative.filename.as_str())?;

        let mut idx = 0;
        while idx < remaining.len() {
            let row = remaining[idx];
            idx += 1;

            if std::ptr::eq(row, representative) {
                continue;
            }

            let rep_path = backup_root.join(&representative.filename);
            let row_path = backup_root.join(&row.filename);

            // Already sharing the representative's inode from a prior pass:
            // no-op regardless of how full the bucket looks from here, so a
            // repeat pass over an already-linked, already-full bucket stays
            // a no-op.
            if same_inode(&rep_path, &row_path)? {
                continue;
            }
            // A same-day file is never relinked into another entry's inode
            // (it may still be mid-write), unless it's the chosen
            // representative itself.
            if row.day_age(now) == 0 {
                continue;
            }

            if representative_links >= max_links {
                // This representative is full; rescan for a fresh one among
                // whatever remains and restart from there.
                report.bucket_splits += 1;
                let rest = &remaining[idx - 1..];
                let Some(next_rep) = pick_representative(rest, backup_root, max_links, now)? else {
                    break;
                };
                representative = next_rep;
                representative_links = current_link_count(backup_root, representative.filename.as_str())?;
                if std::ptr::eq(row, representative) {
                    continue;
                }
            }

            let _ = std::fs::remove_file(&row_path);
            std::fs::hard_link(&rep_path, &row_path).map_err(|e| FaubError::io(&row_path, e))?;
            representative_links += 1;
            report.linked += 1;
        }
    }

    Ok(report)
}

/// Among `rows`, pick the entry with the highest current link count that is
/// both under `max_links` and has a nonzero day age relative to `now`.
fn pick_representative<'a>(
    rows: &[&'a crate::catalog::BackupEntry],
    backup_root: &Path,
    max_links: u64,
    now: i64,
) -> Result<Option<&'a crate::catalog::BackupEntry>> {
    let mut best: Option<(&'a crate::catalog::BackupEntry, u64)> = None;
    for &row in rows {
        if row.day_age(now) == 0 {
            continue;
        }
        let links = current_link_count(backup_root, row.filename.as_str())?;
        if links >= max_links {
            continue;
        }
        if best.map(|(_, l)| links > l).unwrap_or(true) {
            best = Some((row, links));
        }
    }
    Ok(best.map(|(row, _)| row))
}

fn current_link_count(backup_root: &Path, filename: &str) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;
    let path = backup_root.join(filename);
    match std::fs::symlink_metadata(&path) {
        Ok(meta) => Ok(meta.nlink()),
        Err(_) => Ok(1),
    }
}

fn same_inode(a: &Path, b: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let ma = match std::fs::symlink_metadata(a) {
        Ok(m) => m,
        Err(_) => return Ok(false),
    };
    let mb = match std::fs::symlink_metadata(b) {
        Ok(m) => m,
        Err(_) => return Ok(false),
    };
    Ok(ma.dev() == mb.dev() && ma.ino() == mb.ino())
}

/// Buckets keyed by fingerprint, exposed for diagnostics/reporting that
/// want to inspect what would be linked without mutating the filesystem.
pub fn bucket_sizes(cache: &BackupCache) -> HashMap<Fingerprint, usize> {
    cache
        .fingerprints()
        .map(|fp| (fp, cache.get_by_fingerprint(fp).len()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_identical_content_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"same").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"same").unwrap();

        let fp = Fingerprint::of_bytes(b"same");
        let mut cache = BackupCache::new();
        cache.add_or_update("a.txt", fp, 4, 0, 1, 0);
        cache.add_or_update("b.txt", fp, 4, 0, 1, 0);

        let now = 86_400; // both rows are "yesterday" relative to now, so neither is age-0.
        let report = link_backup(&cache, dir.path(), 1000, now).unwrap();
        assert_eq!(report.linked, 1);

        let ma = std::fs::metadata(dir.path().join("a.txt")).unwrap();
        let mb = std::fs::metadata(dir.path().join("b.txt")).unwrap();
        use std::os::unix::fs::MetadataExt;
        assert_eq!(ma.ino(), mb.ino());
    }

    #[test]
    fn second_pass_over_linked_catalog_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"same").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"same").unwrap();

        let fp = Fingerprint::of_bytes(b"same");
        let mut cache = BackupCache::new();
        cache.add_or_update("a.txt", fp, 4, 0, 1, 0);
        cache.add_or_update("b.txt", fp, 4, 0, 1, 0);

        let now = 86_400;
        link_backup(&cache, dir.path(), 1000, now).unwrap();
        let second = link_backup(&cache, dir.path(), 1000, now).unwrap();
        assert_eq!(second.linked, 0);
        assert_eq!(second.bucket_splits, 0);
    }

    #[test]
    fn same_day_file_is_left_unlinked() {
        // A file backed up today may still be settling; linking leaves it
        // alone entirely rather than hardlinking it away into an older
        // representative's inode.
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("today.txt"), b"same").unwrap();
        std::fs::write(dir.path().join("yesterday.txt"), b"same").unwrap();

        let fp = Fingerprint::of_bytes(b"same");
        let mut cache = BackupCache::new();
        cache.add_or_update("today.txt", fp, 4, 0, 1, 86_400);
        cache.add_or_update("yesterday.txt", fp, 4, 0, 1, 0);

        let now = 86_400;
        let report = link_backup(&cache, dir.path(), 1000, now).unwrap();
        assert_eq!(report.linked, 0);

        let ma = std::fs::metadata(dir.path().join("today.txt")).unwrap();
        let mb = std::fs::metadata(dir.path().join("yesterday.txt")).unwrap();
        use std::os::unix::fs::MetadataExt;
        assert_ne!(ma.ino(), mb.ino());
    }
}
