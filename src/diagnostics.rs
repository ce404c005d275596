//! Read-only diagnostics: compare two backups, and analyze a profile's
//! actual disk usage against what its catalogs claim.
//!
//! Grounded in `FaubCache.cc`'s `compare()` (diff two backup directories'
//! file lists and fingerprints) and `analyze()` (walk the filesystem and
//! report where recorded stats and reality diverge) — supplemented into
//! this crate from the original even though the distilled module list
//! omits them, since they're read-only and low-risk to carry forward.

use std::collections::BTreeSet;
use std::path::Path;

use crate::catalog::Fingerprint;
use crate::error::{FaubError, Result};
use crate::walker::Walker;

/// Per-file classification produced by [`compare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareStatus {
    /// Present, identical fingerprint, in both.
    Unchanged,
    /// Present in both but fingerprints differ.
    Modified,
    /// Present only in the left-hand backup.
    OnlyLeft,
    /// Present only in the right-hand backup.
    OnlyRight,
}

/// One row of a [`compare`] report.
#[derive(Debug, Clone)]
pub struct CompareRow {
    pub relative: String,
    pub status: CompareStatus,
}

/// Diff two backup directories by walking both and fingerprinting every
/// regular file found in either.
pub fn compare(left: &Path, right: &Path) -> Result<Vec<CompareRow>> {
    let left_files = relative_file_set(left)?;
    let right_files = relative_file_set(right)?;

    let mut all: BTreeSet<String> = BTreeSet::new();
    all.extend(left_files.keys().cloned());
    all.extend(right_files.keys().cloned());

    let mut rows = Vec::with_capacity(all.len());
    for relative in all {
        let status = match (left_files.get(&relative), right_files.get(&relative)) {
            (Some(l), Some(r)) if l == r => CompareStatus::Unchanged,
            (Some(_), Some(_)) => CompareStatus::Modified,
            (Some(_), None) => CompareStatus::OnlyLeft,
            (None, Some(_)) => CompareStatus::OnlyRight,
            (None, None) => unreachable!("relative came from one of the two sets"),
        };
        rows.push(CompareRow { relative, status });
    }
    Ok(rows)
}

fn relative_file_set(root: &Path) -> Result<std::collections::HashMap<String, Fingerprint>> {
    let mut out = std::collections::HashMap::new();
    for entry in Walker::new(root) {
        let entry = entry.map_err(FaubError::io_bare)?;
        if entry.is_dir {
            continue;
        }
        let meta = std::fs::symlink_metadata(&entry.path).map_err(|e| FaubError::io(&entry.path, e))?;
        if !meta.file_type().is_file() {
            continue;
        }
        let fp = Fingerprint::of_file(&entry.path).map_err(|e| FaubError::io(&entry.path, e))?;
        out.insert(entry.relative.display().to_string(), fp);
    }
    Ok(out)
}

/// One file's churn, as counted by [`analyze`] across every retained
/// backup's `.faub_diff` sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChurnFinding {
    pub relative: String,
    /// Number of backups whose diff sidecar names this file.
    pub change_count: u64,
}

/// One file's total additional space consumed across every backup that
/// recorded it as modified, as tallied by [`analyze`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceFinding {
    pub relative: String,
    pub added_bytes: u64,
}

/// Report produced by [`analyze`]: the top `top_n` most frequently changing
/// files, and the top `top_n` changes that consumed the most additional
/// space, across the profile's retained Faub history.
#[derive(Debug, Clone, Default)]
pub struct AnalysisReport {
    pub most_frequent: Vec<ChurnFinding>,
    pub most_space: Vec<SpaceFinding>,
}

/// `Analyze(profile, topN)`: read every retained backup's `.faub_diff`
/// sidecar under `profile_root` and tally, per modified relative path, how
/// often it changes and how many bytes those changes have cost. Pure and
/// read-only: it only stats files the sidecars already named as changed,
/// never walks the whole tree.
pub fn analyze(profile_root: &Path, cache: &crate::catalog::FaubCache, top_n: usize) -> Result<AnalysisReport> {
    use std::collections::HashMap;

    let mut change_counts: HashMap<String, u64> = HashMap::new();
    let mut added_bytes: HashMap<String, u64> = HashMap::new();

    for entry in cache.entries() {
        let backup_dir = profile_root.join(&entry.directory);
        for relative in &entry.modified_files {
            *change_counts.entry(relative.clone()).or_insert(0) += 1;
            let path = backup_dir.join(relative);
            if let Ok(meta) = std::fs::symlink_metadata(&path) {
                if meta.file_type().is_file() {
                    *added_bytes.entry(relative.clone()).or_insert(0) += meta.len();
                }
            }
        }
    }

    let mut most_frequent: Vec<ChurnFinding> = change_counts
        .into_iter()
        .map(|(relative, change_count)| ChurnFinding { relative, change_count })
        .collect();
    most_frequent.sort_by(|a, b| b.change_count.cmp(&a.change_count).then_with(|| a.relative.cmp(&b.relative)));
    most_frequent.truncate(top_n);

    let mut most_space: Vec<SpaceFinding> = added_bytes
        .into_iter()
        .map(|(relative, added_bytes)| SpaceFinding { relative, added_bytes })
        .collect();
    most_space.sort_by(|a, b| b.added_bytes.cmp(&a.added_bytes).then_with(|| a.relative.cmp(&b.relative)));
    most_space.truncate(top_n);

    Ok(AnalysisReport {
        most_frequent,
        most_space,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_flags_modified_and_onesided_files() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        std::fs::write(left.path().join("same.txt"), b"x").unwrap();
        std::fs::write(right.path().join("same.txt"), b"x").unwrap();
        std::fs::write(left.path().join("changed.txt"), b"a").unwrap();
        std::fs::write(right.path().join("changed.txt"), b"b").unwrap();
        std::fs::write(left.path().join("left_only.txt"), b"l").unwrap();

        let rows = compare(left.path(), right.path()).unwrap();
        let status = |name: &str| {
            rows.iter()
                .find(|r| r.relative == name)
                .map(|r| r.status.clone())
        };
        assert_eq!(status("same.txt"), Some(CompareStatus::Unchanged));
        assert_eq!(status("changed.txt"), Some(CompareStatus::Modified));
        assert_eq!(status("left_only.txt"), Some(CompareStatus::OnlyLeft));
    }

    #[test]
    fn analyze_ranks_churn_and_space_from_diff_sidecars() {
        use crate::catalog::FaubEntry;

        let root = tempfile::tempdir().unwrap();
        let day1 = root.path().join("day1");
        let day2 = root.path().join("day2");
        std::fs::create_dir(&day1).unwrap();
        std::fs::create_dir(&day2).unwrap();
        std::fs::write(day1.join("hot.txt"), b"0123456789").unwrap();
        std::fs::write(day2.join("hot.txt"), b"01234567890123456789").unwrap();
        std::fs::write(day2.join("cold.txt"), b"x").unwrap();

        let mut entry1 = FaubEntry::new("day1", "p", "u1", 0, 1);
        entry1.modified_files = vec!["hot.txt".to_string()];
        let mut entry2 = FaubEntry::new("day2", "p", "u2", 86_400, 1);
        entry2.modified_files = vec!["hot.txt".to_string(), "cold.txt".to_string()];

        let mut cache = crate::catalog::FaubCache::new();
        cache.insert(entry1);
        cache.insert(entry2);

        let report = analyze(root.path(), &cache, 5).unwrap();
        assert_eq!(report.most_frequent[0].relative, "hot.txt");
        assert_eq!(report.most_frequent[0].change_count, 2);
        assert_eq!(report.most_space[0].relative, "hot.txt");
        assert_eq!(report.most_space[0].added_bytes, 30);
    }

    #[test]
    fn analyze_respects_top_n() {
        use crate::catalog::FaubEntry;

        let root = tempfile::tempdir().unwrap();
        let day1 = root.path().join("day1");
        std::fs::create_dir(&day1).unwrap();
        std::fs::write(day1.join("a.txt"), b"a").unwrap();
        std::fs::write(day1.join("b.txt"), b"b").unwrap();

        let mut entry = FaubEntry::new("day1", "p", "u1", 0, 1);
        entry.modified_files = vec!["a.txt".to_string(), "b.txt".to_string()];
        let mut cache = crate::catalog::FaubCache::new();
        cache.insert(entry);

        let report = analyze(root.path(), &cache, 1).unwrap();
        assert_eq!(report.most_frequent.len(), 1);
        assert_eq!(report.most_space.len(), 1);
    }
}
