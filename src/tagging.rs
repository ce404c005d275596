//! Tagging store: user-assigned labels on backups, plus a hold-expiry map
//! that protects tagged backups from retention pruning for a time window.
//!
//! Grounded in `tagging.cc`'s bidirectional multimaps (`tag -> [backups]`,
//! `backup -> [tags]`) and its lazy `load()`/destructor-triggered `save()`.
//! Persistence is two append-style text files under the profile's cache
//! directory — `tags` (`tag<TAB>backup` per line) and `tags.hold`
//! (`backup<TAB>until` per line) — matching the original's flat per-concern
//! files rather than one JSON blob, so an operator can `grep`/`cat` either
//! one directly. The Rust rendering replaces "save on drop" with an
//! explicit `save()` the caller invokes at natural commit points, since an
//! `impl Drop` that can fail has nowhere good to report the error —
//! matching the general guidance that fallible cleanup belongs in an
//! explicit method, not a destructor.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{FaubError, Result};

const TAGS_FILE: &str = "tags";
const HOLDS_FILE: &str = "tags.hold";

/// In-memory tagging store for one profile, lazily loaded and explicitly
/// saved.
#[derive(Debug, Default)]
pub struct Tagging {
    /// tag -> set of backup directory names.
    tag_to_backups: HashMap<String, HashSet<String>>,
    /// backup directory name -> unix-seconds it's held until.
    hold_until: HashMap<String, i64>,
    loaded: bool,
    dirty: bool,
}

impl Tagging {
    /// An empty, not-yet-loaded store.
    pub fn new() -> Self {
        Self::default()
    }

    fn tags_path(cache_dir: &Path) -> PathBuf {
        cache_dir.join(TAGS_FILE)
    }

    fn holds_path(cache_dir: &Path) -> PathBuf {
        cache_dir.join(HOLDS_FILE)
    }

    fn ensure_loaded(&mut self, cache_dir: &Path) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let tags_path = Self::tags_path(cache_dir);
        match std::fs::read_to_string(&tags_path) {
            Ok(text) => {
                for line in text.lines() {
                    let Some((tag, backup)) = line.split_once('\t') else {
                        continue;
                    };
                    self.tag_to_backups
                        .entry(tag.to_string())
                        .or_default()
                        .insert(backup.to_string());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(FaubError::io(&tags_path, e)),
        }

        let holds_path = Self::holds_path(cache_dir);
        match std::fs::read_to_string(&holds_path) {
            Ok(text) => {
                for line in text.lines() {
                    let Some((backup, until)) = line.split_once('\t') else {
                        continue;
                    };
                    if let Ok(until) = until.trim().parse::<i64>() {
                        self.hold_until.insert(backup.to_string(), until);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(FaubError::io(&holds_path, e)),
        }

        self.loaded = true;
        Ok(())
    }

    /// Rewrite both `tags` and `tags.hold` under `cache_dir` if anything
    /// changed since load, via a temp-file-then-rename write each.
    pub fn save(&mut self, cache_dir: &Path) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut tag_lines: Vec<String> = Vec::new();
        let mut tags_sorted: Vec<&String> = self.tag_to_backups.keys().collect();
        tags_sorted.sort();
        for tag in tags_sorted {
            let mut backups: Vec<&String> = self.tag_to_backups[tag].iter().collect();
            backups.sort();
            for backup in backups {
                tag_lines.push(format!("{tag}\t{backup}"));
            }
        }
        write_atomic(&Self::tags_path(cache_dir), &tag_lines.join("\n"))?;

        let mut hold_lines: Vec<String> = Vec::new();
        let mut holds_sorted: Vec<(&String, &i64)> = self.hold_until.iter().collect();
        holds_sorted.sort_by(|a, b| a.0.cmp(b.0));
        for (backup, until) in holds_sorted {
            hold_lines.push(format!("{backup}\t{until}"));
        }
        write_atomic(&Self::holds_path(cache_dir), &hold_lines.join("\n"))?;

        self.dirty = false;
        Ok(())
    }

    /// Attach `tag` to `backup`.
    pub fn tag_backup(&mut self, cache_dir: &Path, backup: &str, tag: &str) -> Result<()> {
        self.ensure_loaded(cache_dir)?;
        self.tag_to_backups
            .entry(tag.to_string())
            .or_default()
            .insert(backup.to_string());
        self.dirty = true;
        Ok(())
    }

    /// Remove `tag` from `backup` only.
    pub fn remove_tag_on(&mut self, cache_dir: &Path, backup: &str, tag: &str) -> Result<()> {
        self.ensure_loaded(cache_dir)?;
        if let Some(set) = self.tag_to_backups.get_mut(tag) {
            set.remove(backup);
            if set.is_empty() {
                self.tag_to_backups.remove(tag);
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Remove `tag` entirely, from every backup.
    pub fn remove_tag(&mut self, cache_dir: &Path, tag: &str) -> Result<()> {
        self.ensure_loaded(cache_dir)?;
        self.tag_to_backups.remove(tag);
        self.dirty = true;
        Ok(())
    }

    /// Every backup directory name bearing `tag`.
    pub fn backups_matching_tag(&mut self, cache_dir: &Path, tag: &str) -> Result<Vec<String>> {
        self.ensure_loaded(cache_dir)?;
        Ok(self
            .tag_to_backups
            .get(tag)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Every tag currently on `backup`.
    pub fn tags_on_backup(&mut self, cache_dir: &Path, backup: &str) -> Result<Vec<String>> {
        self.ensure_loaded(cache_dir)?;
        Ok(self
            .tag_to_backups
            .iter()
            .filter(|(_, backups)| backups.contains(backup))
            .map(|(tag, _)| tag.clone())
            .collect())
    }

    /// Whether `backup` carries `tag` (used by prune/cleanup filters).
    pub fn matches(&mut self, cache_dir: &Path, backup: &str, tag: &str) -> Result<bool> {
        self.ensure_loaded(cache_dir)?;
        Ok(self
            .tag_to_backups
            .get(tag)
            .map(|set| set.contains(backup))
            .unwrap_or(false))
    }

    /// Every tag known to this profile, sorted.
    pub fn list_tags(&mut self, cache_dir: &Path) -> Result<Vec<String>> {
        self.ensure_loaded(cache_dir)?;
        let mut tags: Vec<String> = self.tag_to_backups.keys().cloned().collect();
        tags.sort();
        Ok(tags)
    }

    /// Set (or clear, with `None`) a hold-until time on `backup`.
    pub fn set_hold(&mut self, cache_dir: &Path, backup: &str, until: Option<i64>) -> Result<()> {
        self.ensure_loaded(cache_dir)?;
        match until {
            Some(t) => {
                self.hold_until.insert(backup.to_string(), t);
            }
            None => {
                self.hold_until.remove(backup);
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// The hold-until time on `backup`, if any.
    pub fn hold_until(&mut self, cache_dir: &Path, backup: &str) -> Result<Option<i64>> {
        self.ensure_loaded(cache_dir)?;
        Ok(self.hold_until.get(backup).copied())
    }

    /// Rewrite every tag/hold reference to `old_name` as `new_name`, used
    /// when a profile (and its backup directories) gets renamed wholesale.
    pub fn rename_profile(&mut self, cache_dir: &Path, old_name: &str, new_name: &str) -> Result<()> {
        self.ensure_loaded(cache_dir)?;
        for backups in self.tag_to_backups.values_mut() {
            if backups.remove(old_name) {
                backups.insert(new_name.to_string());
            }
        }
        if let Some(v) = self.hold_until.remove(old_name) {
            self.hold_until.insert(new_name.to_string(), v);
        }
        self.dirty = true;
        Ok(())
    }
}

fn write_atomic(path: &Path, body: &str) -> Result<()> {
    let mut body = body.to_string();
    if !body.is_empty() {
        body.push('\n');
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &body).map_err(|e| FaubError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| FaubError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_then_query_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut tagging = Tagging::new();
        tagging.tag_backup(dir.path(), "2026-07-27", "keep-forever").unwrap();
        tagging.save(dir.path()).unwrap();

        let mut reloaded = Tagging::new();
        let backups = reloaded.backups_matching_tag(dir.path(), "keep-forever").unwrap();
        assert_eq!(backups, vec!["2026-07-27".to_string()]);
    }

    #[test]
    fn persists_as_two_separate_text_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut tagging = Tagging::new();
        tagging.tag_backup(dir.path(), "2026-07-27", "keep-forever").unwrap();
        tagging.set_hold(dir.path(), "2026-07-27", Some(123)).unwrap();
        tagging.save(dir.path()).unwrap();

        let tags_text = std::fs::read_to_string(dir.path().join("tags")).unwrap();
        assert_eq!(tags_text.trim(), "keep-forever\t2026-07-27");
        let holds_text = std::fs::read_to_string(dir.path().join("tags.hold")).unwrap();
        assert_eq!(holds_text.trim(), "2026-07-27\t123");
    }

    #[test]
    fn rename_profile_moves_tags_and_holds() {
        let dir = tempfile::tempdir().unwrap();
        let mut tagging = Tagging::new();
        tagging.tag_backup(dir.path(), "old", "t").unwrap();
        tagging.set_hold(dir.path(), "old", Some(100)).unwrap();
        tagging.rename_profile(dir.path(), "old", "new").unwrap();

        assert!(tagging.matches(dir.path(), "new", "t").unwrap());
        assert_eq!(tagging.hold_until(dir.path(), "new").unwrap(), Some(100));
    }
}
