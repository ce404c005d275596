//! Lazy, iterator-based filesystem walker.
//!
//! The original drives directory traversal with a callback
//! (`recursiveScan(dir, callback)` in `util_files.cc`); the idiomatic Rust
//! rendering is an `Iterator` instead, per the design notes' guidance to
//! prefer pull-based iteration over push-based callbacks. `skip_subtree`
//! lets a caller prune a directory (e.g. one excluded by the profile's
//! exclude-pattern list) without the walker having to know about exclusion
//! policy itself.

use std::fs::DirEntry;
use std::path::{Path, PathBuf};

use regex::Regex;

/// One entry produced by the walk: a path plus how deep it sits relative to
/// the walk's root.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Absolute path to this entry.
    pub path: PathBuf,
    /// Path relative to the walk's root.
    pub relative: PathBuf,
    /// 0 for the root's direct children, increasing with depth.
    pub depth: usize,
    /// Whether this entry is itself a directory (and so could be pruned).
    pub is_dir: bool,
}

/// Filters applied during a walk, matching the profile-level
/// include/exclude/depth/symlink settings passed to `recursiveScan`.
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// If set, only basenames matching this regex are yielded.
    pub include: Option<Regex>,
    /// If set, basenames matching this regex are never yielded (and, for a
    /// directory, never descended into).
    pub exclude: Option<Regex>,
    /// If set, entries deeper than this are not yielded and directories at
    /// this depth are not descended into.
    pub max_depth: Option<usize>,
    /// Whether a symlink to a directory is descended into as though it were
    /// one. Default `false`, matching `lstat`-based traversal that never
    /// follows a link into a subtree (and so can't be fooled by a cycle).
    pub follow_symlinks: bool,
}

impl WalkOptions {
    fn basename_allowed(&self, name: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(name) {
                return false;
            }
        }
        if let Some(include) = &self.include {
            if !include.is_match(name) {
                return false;
            }
        }
        true
    }
}

struct PendingDir {
    path: PathBuf,
    relative: PathBuf,
    depth: usize,
}

/// A depth-first, lazy walk rooted at a path, yielding [`WalkEntry`] values.
///
/// Symlinks are yielded as entries but never followed into as directories,
/// matching `lstat`-based traversal so circular symlinks can't loop the
/// walker.
pub struct Walker {
    stack: Vec<PendingDir>,
    current: Option<std::fs::ReadDir>,
    current_relative: PathBuf,
    current_depth: usize,
    skip_requested: bool,
    options: WalkOptions,
}

impl Walker {
    /// Start an unfiltered walk rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_options(root, WalkOptions::default())
    }

    /// Start a walk rooted at `root`, applying `options`'
    /// include/exclude/depth/symlink filters.
    pub fn with_options(root: impl Into<PathBuf>, options: WalkOptions) -> Self {
        let root = root.into();
        Walker {
            stack: vec![PendingDir {
                path: root,
                relative: PathBuf::new(),
                depth: 0,
            }],
            current: None,
            current_relative: PathBuf::new(),
            current_depth: 0,
            skip_requested: false,
            options,
        }
    }

    /// Call after receiving a directory [`WalkEntry`] to prevent descending
    /// into it. Has no effect on a non-directory entry.
    pub fn skip_subtree(&mut self) {
        self.skip_requested = true;
    }

    fn advance_dir_entry(&mut self, entry: DirEntry) -> std::io::Result<Option<WalkEntry>> {
        let path = entry.path();
        let relative = self.current_relative.join(entry.file_name());
        let meta = std::fs::symlink_metadata(&path)?;
        let depth = self.current_depth + 1;

        let basename = entry.file_name();
        let basename = basename.to_string_lossy();
        if !self.options.basename_allowed(&basename) {
            return Ok(None);
        }
        if let Some(max_depth) = self.options.max_depth {
            if depth > max_depth {
                return Ok(None);
            }
        }

        let descend_as_dir = meta.is_dir() || (self.options.follow_symlinks && meta.is_symlink() && path.is_dir());
        let is_dir = meta.is_dir();
        if descend_as_dir {
            self.stack.push(PendingDir {
                path: path.clone(),
                relative: relative.clone(),
                depth,
            });
        }
        Ok(Some(WalkEntry {
            path,
            relative,
            depth,
            is_dir,
        }))
    }
}

impl Iterator for Walker {
    type Item = std::io::Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.skip_requested {
                self.skip_requested = false;
                // The directory we just yielded pushed itself onto `stack`;
                // pop it back off so we never descend into it.
                self.stack.pop();
            }

            if let Some(read_dir) = self.current.as_mut() {
                match read_dir.next() {
                    Some(Ok(entry)) => match self.advance_dir_entry(entry) {
                        Ok(Some(walk_entry)) => return Some(Ok(walk_entry)),
                        Ok(None) => continue,
                        Err(e) => return Some(Err(e)),
                    },
                    Some(Err(e)) => return Some(Err(e)),
                    None => self.current = None,
                }
                continue;
            }

            let next_dir = self.stack.pop()?;
            match std::fs::read_dir(&next_dir.path) {
                Ok(rd) => {
                    self.current = Some(rd);
                    self.current_relative = next_dir.relative;
                    self.current_depth = next_dir.depth;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Convenience: walk `root` and collect every regular-file path, ignoring
/// directories and symlinks. Used by diagnostics that just need a flat
/// file list (e.g. [`crate::diagnostics::compare`]).
pub fn regular_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in Walker::new(root) {
        let entry = entry?;
        if !entry.is_dir && std::fs::symlink_metadata(&entry.path)?.file_type().is_file() {
            out.push(entry.path);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_nested_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/f.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("top.txt"), b"y").unwrap();

        let mut names: Vec<_> = Walker::new(dir.path())
            .map(|e| e.unwrap().relative.to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "a/f.txt", "top.txt"]);
    }

    #[test]
    fn skip_subtree_prunes_children() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("skip")).unwrap();
        std::fs::write(dir.path().join("skip/f.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"y").unwrap();

        let mut walker = Walker::new(dir.path());
        let mut seen = Vec::new();
        while let Some(entry) = walker.next() {
            let entry = entry.unwrap();
            if entry.relative == Path::new("skip") {
                walker.skip_subtree();
            }
            seen.push(entry.relative.to_string_lossy().into_owned());
        }
        seen.sort();
        assert_eq!(seen, vec!["keep.txt", "skip"]);
    }

    #[test]
    fn exclude_regex_prunes_matching_basenames() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/x.js"), b"x").unwrap();
        std::fs::write(dir.path().join("main.rs"), b"y").unwrap();

        let options = WalkOptions {
            exclude: Some(Regex::new("^node_modules$").unwrap()),
            ..Default::default()
        };
        let names: Vec<_> = Walker::with_options(dir.path(), options)
            .map(|e| e.unwrap().relative.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["main.rs"]);
    }

    #[test]
    fn include_regex_keeps_only_matching_basenames() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), b"x").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"y").unwrap();

        let options = WalkOptions {
            include: Some(Regex::new(r"\.rs$").unwrap()),
            ..Default::default()
        };
        let names: Vec<_> = Walker::with_options(dir.path(), options)
            .map(|e| e.unwrap().relative.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.rs"]);
    }

    #[test]
    fn max_depth_stops_descent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/deep.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("a/shallow.txt"), b"y").unwrap();

        let options = WalkOptions {
            max_depth: Some(1),
            ..Default::default()
        };
        let mut names: Vec<_> = Walker::with_options(dir.path(), options)
            .map(|e| e.unwrap().relative.to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a"]);
    }
}
