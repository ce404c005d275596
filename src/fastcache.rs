//! Fast status cache: a precomputed summary line plus the watched mtimes
//! that invalidate it, so a status query can skip rescanning the whole
//! profile when nothing relevant changed.
//!
//! Grounded in `FastCache.cc`'s `status.tx` (triples of `line`, first-seen
//! time, last-seen time) and `status.fl` (watched file/mtime pairs) —
//! rendered as two sidecar files under the same names so the on-disk layout
//! stays legible to an operator poking around with a text editor, but
//! parsed/written with explicit structs instead of the original's ad-hoc
//! line-oriented scanning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{FaubError, Result};

/// One cached status line and when it was first/last computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub text: String,
    pub first_seen: i64,
    pub last_seen: i64,
}

/// A fast-status cache rooted at a profile's cache directory.
#[derive(Debug, Default)]
pub struct FastCache {
    lines: Vec<StatusLine>,
    watched: HashMap<PathBuf, i64>,
}

impl FastCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn tx_path(cache_dir: &Path) -> PathBuf {
        cache_dir.join("status.tx")
    }
    fn fl_path(cache_dir: &Path) -> PathBuf {
        cache_dir.join("status.fl")
    }

    /// Load a previously committed cache, or an empty one if none exists.
    pub fn load(cache_dir: &Path) -> Result<Self> {
        let mut cache = FastCache::new();

        let tx_path = Self::tx_path(cache_dir);
        if let Ok(text) = std::fs::read_to_string(&tx_path) {
            for line in text.lines() {
                let mut parts = line.splitn(3, '\t');
                if let (Some(first), Some(last), Some(body)) =
                    (parts.next(), parts.next(), parts.next())
                {
                    if let (Ok(first), Ok(last)) = (first.parse(), last.parse()) {
                        cache.lines.push(StatusLine {
                            text: body.to_string(),
                            first_seen: first,
                            last_seen: last,
                        });
                    }
                }
            }
        }

        let fl_path = Self::fl_path(cache_dir);
        if let Ok(text) = std::fs::read_to_string(&fl_path) {
            for line in text.lines() {
                let mut parts = line.splitn(2, '\t');
                if let (Some(path), Some(mtime)) = (parts.next(), parts.next()) {
                    if let Ok(mtime) = mtime.parse() {
                        cache.watched.insert(PathBuf::from(path), mtime);
                    }
                }
            }
        }

        Ok(cache)
    }

    /// Whether every watched path's mtime still matches what was recorded,
    /// i.e. the cached status lines remain valid without a rescan.
    pub fn verify_file_mtimes(&self) -> bool {
        self.watched.iter().all(|(path, &recorded)| {
            std::fs::metadata(path)
                .map(|m| {
                    m.modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_secs() as i64 == recorded)
                        .unwrap_or(false)
                })
                .unwrap_or(false)
        })
    }

    /// Append a status line, or bump its `last_seen` if an identical line
    /// already exists.
    pub fn append_status(&mut self, text: impl Into<String>, now: i64) {
        let text = text.into();
        if let Some(existing) = self.lines.iter_mut().find(|l| l.text == text) {
            existing.last_seen = now;
        } else {
            self.lines.push(StatusLine {
                text,
                first_seen: now,
                last_seen: now,
            });
        }
    }

    /// Add (or replace) a watched file/mtime pair, deduplicating by path.
    pub fn append_file(&mut self, path: impl Into<PathBuf>, mtime: i64) {
        self.watched.insert(path.into(), mtime);
    }

    /// The current cached lines, oldest-first-seen.
    pub fn lines(&self) -> &[StatusLine] {
        &self.lines
    }

    /// Drop every cached line and watched file, forcing the next query to
    /// recompute from scratch.
    pub fn invalidate(&mut self) {
        self.lines.clear();
        self.watched.clear();
    }

    /// Write both sidecars via temp-file-then-rename.
    pub fn commit(&self, cache_dir: &Path) -> Result<()> {
        let mut tx_body = String::new();
        for line in &self.lines {
            tx_body.push_str(&format!("{}\t{}\t{}\n", line.first_seen, line.last_seen, line.text));
        }
        write_atomic(&Self::tx_path(cache_dir), tx_body.as_bytes())?;

        let mut fl_body = String::new();
        let mut paths: Vec<_> = self.watched.iter().collect();
        paths.sort_by(|a, b| a.0.cmp(b.0));
        for (path, mtime) in paths {
            fl_body.push_str(&format!("{}\t{mtime}\n", path.display()));
        }
        write_atomic(&Self::fl_path(cache_dir), fl_body.as_bytes())?;
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(|e| FaubError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| FaubError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FastCache::new();
        cache.append_status("profile home: 12 backups", 100);
        cache.append_file(dir.path().join("watched"), 50);
        cache.commit(dir.path()).unwrap();

        let reloaded = FastCache::load(dir.path()).unwrap();
        assert_eq!(reloaded.lines().len(), 1);
        assert_eq!(reloaded.lines()[0].text, "profile home: 12 backups");
    }

    #[test]
    fn verify_mtimes_detects_drift() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("watched");
        std::fs::write(&watched, b"x").unwrap();

        let mut cache = FastCache::new();
        cache.append_file(&watched, 0);
        assert!(!cache.verify_file_mtimes());
    }
}
